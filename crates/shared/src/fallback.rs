//! Deterministic stand-ins for provider output.
//!
//! Everything here is a pure function of the combination key, so two runs over
//! the same key produce the same names and the persisted batch stays stable.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::llm::contracts::{ActivityItem, TrendingItem};
use crate::models::{CombinationKey, PlaceRecord, RecordOrigin, TrendingPlace};

const ADJECTIVES: &[&str] = &[
    "Hidden", "Golden", "Riverside", "Old Town", "Corner", "Lantern", "Harbor", "Maple", "Northside",
    "Copper",
];
const HIGHLIGHTS: &[&str] = &[
    "a loyal neighborhood following",
    "friendly staff and an easygoing pace",
    "a standout signature offering",
    "a calm spot away from the crowds",
    "a lively atmosphere on weekends",
    "thoughtful details that reward repeat visits",
];

struct InterestFamily {
    category: &'static str,
    place_types: &'static [&'static str],
}

const COFFEE: InterestFamily = InterestFamily {
    category: "cafe",
    place_types: &["Roasters", "Cafe", "Espresso Bar"],
};
const FOOD: InterestFamily = InterestFamily {
    category: "restaurant",
    place_types: &["Kitchen", "Bistro", "Food Hall"],
};
const ART: InterestFamily = InterestFamily {
    category: "gallery",
    place_types: &["Gallery", "Studio", "Art Collective"],
};
const OUTDOORS: InterestFamily = InterestFamily {
    category: "outdoors",
    place_types: &["Trail", "Overlook", "Ridge Loop"],
};
const NIGHTLIFE: InterestFamily = InterestFamily {
    category: "bar",
    place_types: &["Lounge", "Social Club", "Rooftop"],
};
const MUSEUMS: InterestFamily = InterestFamily {
    category: "museum",
    place_types: &["Museum", "Archive", "Heritage Center"],
};
const SHOPPING: InterestFamily = InterestFamily {
    category: "shop",
    place_types: &["Market", "Emporium", "Arcade"],
};
const GENERAL: InterestFamily = InterestFamily {
    category: "attraction",
    place_types: &["Commons", "Square", "Collective"],
};

fn family_for(interest: &str) -> &'static InterestFamily {
    let interest = interest.to_ascii_lowercase();
    let matches = |needles: &[&str]| needles.iter().any(|needle| interest.contains(needle));
    if matches(&["coffee", "cafe", "tea"]) {
        &COFFEE
    } else if matches(&["food", "dining", "restaurant", "brunch", "eat"]) {
        &FOOD
    } else if matches(&["art", "design", "craft"]) {
        &ART
    } else if matches(&["hik", "outdoor", "park", "nature", "trail"]) {
        &OUTDOORS
    } else if matches(&["night", "bar", "music", "club"]) {
        &NIGHTLIFE
    } else if matches(&["museum", "history", "culture"]) {
        &MUSEUMS
    } else if matches(&["shop", "market", "fashion"]) {
        &SHOPPING
    } else {
        &GENERAL
    }
}

fn seed(key: &CombinationKey) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key.location.trim().to_lowercase().as_bytes());
    hasher.update([0x1f]);
    hasher.update(key.interest.trim().to_lowercase().as_bytes());
    hasher.finalize().into()
}

fn byte_at(seed: &[u8; 32], index: usize) -> usize {
    usize::from(seed[index % seed.len()])
}

/// Markdown research notes standing in for the research stage.
pub fn research_text(key: &CombinationKey) -> String {
    let seed = seed(key);
    let family = family_for(&key.interest);
    let interest = key.interest.to_lowercase();
    let mut text = format!(
        "# {} in {}\n\n{} has a steady {interest} scene built around independent {} spots.\n\n## Highlights\n",
        key.interest, key.location, key.location, family.category,
    );
    for offset in 0..3 {
        let highlight = HIGHLIGHTS[(byte_at(&seed, offset) + offset) % HIGHLIGHTS.len()];
        text.push_str(&format!("- Places known for {highlight}\n"));
    }
    text
}

/// `count` activity items with unique names.
pub fn activity_items(key: &CombinationKey, count: usize) -> Vec<ActivityItem> {
    let seed = seed(key);
    let family = family_for(&key.interest);
    let adjective_offset = byte_at(&seed, 0);
    let type_offset = byte_at(&seed, 1);
    let interest_tag = key.interest.trim().to_lowercase();

    (0..count)
        .map(|index| {
            let adjective = ADJECTIVES[(adjective_offset + index) % ADJECTIVES.len()];
            let place_type = family.place_types[(type_offset + index) % family.place_types.len()];
            let round = index / ADJECTIVES.len();
            let name = if round == 0 {
                format!("{adjective} {place_type}")
            } else {
                format!("{adjective} {place_type} {}", round + 1)
            };
            let highlight = HIGHLIGHTS[(byte_at(&seed, index + 2) + index) % HIGHLIGHTS.len()];
            let price_level = 1 + (byte_at(&seed, index + 3) % 4) as i16;
            let popularity_score = 60.0 + (byte_at(&seed, index + 4) % 40) as f64;

            ActivityItem {
                description: format!(
                    "{name} is a {interest_tag} stop in {} with {highlight}.",
                    key.location
                ),
                name,
                category: family.category.to_string(),
                tags: vec![interest_tag.clone(), family.category.to_string()],
                address: None,
                latitude: None,
                longitude: None,
                price_level,
                popularity_score,
            }
        })
        .collect()
}

pub fn activity_records(
    key: &CombinationKey,
    count: usize,
    generated_at: DateTime<Utc>,
) -> Vec<PlaceRecord> {
    activity_items(key, count)
        .into_iter()
        .map(|item| item.into_record(key, RecordOrigin::DeterministicFallback, generated_at))
        .collect()
}

/// Ranks candidate records by popularity. With no candidates, ranks a
/// generated general-interest batch for the location instead.
pub fn trending_items(location: &str, candidates: &[PlaceRecord], limit: usize) -> Vec<TrendingItem> {
    let mut ranked = if candidates.is_empty() {
        activity_records(
            &CombinationKey::new(location, "Local Favorites"),
            limit,
            Utc::now(),
        )
    } else {
        candidates.to_vec()
    };
    ranked.sort_by(|left, right| {
        right
            .popularity_score
            .total_cmp(&left.popularity_score)
            .then_with(|| left.name.cmp(&right.name))
    });

    let mut seen = std::collections::HashSet::new();
    ranked
        .into_iter()
        .filter(|record| seen.insert(record.name.to_lowercase()))
        .take(limit)
        .map(|record| TrendingItem {
            reason: format!(
                "Consistently popular with {} fans in {location}",
                record.interest.to_lowercase()
            ),
            name: record.name,
            score: record.popularity_score,
        })
        .collect()
}

pub fn trending_places(
    location: &str,
    candidates: &[PlaceRecord],
    limit: usize,
    generated_at: DateTime<Utc>,
) -> Vec<TrendingPlace> {
    trending_items(location, candidates, limit)
        .into_iter()
        .zip(1_i32..)
        .map(|(item, rank)| {
            item.into_place(location, rank, RecordOrigin::DeterministicFallback, generated_at)
        })
        .collect()
}
