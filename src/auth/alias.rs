//! Pseudonymous alias generation for shadow identities.
//!
//! Aliases are not checked for uniqueness; collisions are acceptable.

use rand::seq::SliceRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "Quiet", "Gentle", "Calm", "Hopeful", "Brave", "Kind", "Soft", "Steady", "Bright", "Patient",
    "Serene", "Warm", "Silent", "Tender", "Wandering", "Hidden", "Misty", "Golden", "Peaceful",
    "Curious",
];

const NOUNS: &[&str] = &[
    "Willow", "River", "Sparrow", "Harbor", "Lantern", "Meadow", "Feather", "Ember", "Cloud",
    "Fern", "Pebble", "Moon", "Brook", "Owl", "Cedar", "Dawn", "Tide", "Heron", "Maple", "Star",
];

/// Produces human-readable pseudonyms.
pub trait AliasGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// `<Adjective><Noun><number>`, e.g. `QuietWillow482`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordAliasGenerator;

impl AliasGenerator for WordAliasGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Quiet");
        let noun = NOUNS.choose(&mut rng).copied().unwrap_or("Willow");
        let number: u16 = rng.gen_range(10..1000);
        format!("{adjective}{noun}{number}")
    }
}

/// Convenience wrapper around the default generator.
pub fn generate_alias() -> String {
    WordAliasGenerator.generate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_alias_is_non_empty_and_ascii() {
        for _ in 0..200 {
            let alias = generate_alias();
            assert!(!alias.is_empty());
            assert!(alias.is_ascii());
            assert!(alias.chars().next().unwrap().is_ascii_uppercase());
            assert!(alias.chars().last().unwrap().is_ascii_digit());
        }
    }

    #[test]
    fn generated_alias_fits_alias_rules() {
        for _ in 0..200 {
            assert!(crate::auth::user::validate_alias(&generate_alias()).is_ok());
        }
    }
}
