use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CliOptions {
    pub(crate) once: bool,
    /// Replaces the configured location axis when non-empty.
    pub(crate) locations: Vec<String>,
    /// Replaces the configured interest axis when non-empty.
    pub(crate) interests: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum CliError {
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
    #[error("missing value for argument: {0}")]
    MissingValue(String),
    #[error("help requested")]
    HelpRequested,
}

impl CliOptions {
    pub(crate) fn parse<I>(args: I) -> Result<Self, CliError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = Self::default();

        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => return Err(CliError::HelpRequested),
                "--once" => options.once = true,
                "--location" => options.locations.push(required_value(&arg, iter.next())?),
                "--interest" => options.interests.push(required_value(&arg, iter.next())?),
                unknown => return Err(CliError::UnknownArgument(unknown.to_string())),
            }
        }

        Ok(options)
    }
}

fn required_value(flag: &str, value: Option<String>) -> Result<String, CliError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && !value.starts_with("--"))
        .ok_or_else(|| CliError::MissingValue(flag.to_string()))
}
