//! Postgres-backed tests for the shared store. See `tests/`.
