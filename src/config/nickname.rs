//! Random nickname generator.
//!
//! Produces nicknames in the format `AdjectiveNounNN` (e.g. `QuietQuill42`).
//! Each server-mode session needs its own nick on the network, so the space
//! is wide enough that collisions between concurrent users are rare.

use rand::RngExt;

const ADJECTIVES: &[&str] = &[
    "Quiet", "Dusty", "Amber", "Velvet", "Silver", "Inky", "Gilded", "Worn", "Bold", "Brisk",
    "Candid", "Curious", "Lucid", "Mellow", "Nimble", "Patient", "Rustic", "Sable", "Tawny",
    "Vivid", "Wistful", "Ardent", "Bright", "Cobalt",
];

const NOUNS: &[&str] = &[
    "Quill", "Folio", "Reader", "Page", "Spine", "Binder", "Scribe", "Verse", "Tome", "Margin",
    "Ledger", "Atlas", "Codex", "Fable", "Lexis", "Novel", "Primer", "Saga", "Sonnet", "Crab",
];

/// Generate a random nickname like `QuietQuill42`.
pub fn generate_nickname() -> String {
    let mut rng = rand::rng();
    let adj = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let num: u8 = rng.random_range(0..100);
    format!("{}{}{}", adj, noun, num)
}
