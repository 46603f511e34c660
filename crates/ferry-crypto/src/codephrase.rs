//! Codephrase generation and validation.
//!
//! Generated codephrases look like `4821-harbor-violet-tango`: a four digit
//! pin followed by three words drawn uniformly from a 256-word list, about
//! 37 bits of entropy. That is plenty for a PAKE, which only allows one
//! online guess per session.

use crate::CryptoError;
use crate::random::random_index;

/// Shortest codephrase accepted by `send` and `receive`.
pub const MIN_CODEPHRASE_LEN: usize = 4;

/// Number of words in a generated codephrase.
pub const DEFAULT_WORDS: usize = 3;

const WORDS: [&str; 256] = [
    "acid", "actor", "adobe", "agent", "alarm", "album", "alpha", "amber", "anchor", "angel",
    "apple", "april", "arena", "arrow", "atlas", "atom", "august", "aura", "axis", "bacon",
    "badge", "baker", "bamboo", "banjo", "barn", "basil", "beacon", "bench", "berry", "bison",
    "blade", "blaze", "bloom", "bonus", "boxer", "brave", "bread", "brick", "bronze", "buffalo",
    "cabin", "cactus", "camel", "canal", "candle", "canoe", "canyon", "carbon", "cargo", "castle",
    "cedar", "cello", "chalk", "chess", "cider", "cinema", "circus", "citrus", "clay", "cliff",
    "clock", "cloud", "cobalt", "cocoa", "comet", "coral", "cotton", "crane", "crystal", "cycle",
    "daisy", "delta", "denim", "desert", "diesel", "dingo", "disco", "dolphin", "domino", "dragon",
    "drift", "drum", "eagle", "echo", "eclipse", "elbow", "ember", "emerald", "engine", "epoch",
    "falcon", "fennel", "ferry", "fiber", "fiesta", "flame", "flint", "flute", "forest", "fossil",
    "fox", "frost", "galaxy", "garden", "garlic", "gazelle", "gecko", "ginger", "glacier", "globe",
    "gold", "gorilla", "granite", "gravity", "guitar", "gypsum", "hammer", "harbor", "harvest", "hazel",
    "helium", "heron", "honey", "horizon", "hotel", "husky", "igloo", "indigo", "iris", "iron",
    "island", "ivory", "jacket", "jaguar", "jasmine", "jelly", "jester", "jigsaw", "jungle", "juniper",
    "kayak", "kernel", "kettle", "kiwi", "koala", "lagoon", "lantern", "laser", "lemon", "lens",
    "lilac", "linen", "lizard", "lobster", "lotus", "lunar", "magnet", "mango", "maple", "marble",
    "meadow", "melon", "mercury", "meteor", "mint", "mirror", "mocha", "monsoon", "mosaic", "motor",
    "nectar", "needle", "neon", "nickel", "nimbus", "noodle", "nova", "nutmeg", "oasis", "ocean",
    "olive", "onyx", "opal", "orbit", "orchid", "otter", "oxygen", "paddle", "panda", "paper",
    "parrot", "pebble", "pepper", "piano", "pilot", "pixel", "planet", "plasma", "polar", "pony",
    "prism", "pumpkin", "puzzle", "quartz", "quill", "rabbit", "radar", "radio", "raven", "reef",
    "ribbon", "river", "robin", "rocket", "ruby", "saddle", "saffron", "salmon", "satin", "saturn",
    "scarlet", "shadow", "silver", "sketch", "sonic", "spark", "sphinx", "spiral", "spruce", "squid",
    "stone", "storm", "sugar", "summit", "sunset", "tango", "tiger", "timber", "topaz", "torch",
    "tulip", "tundra", "turtle", "umbrella", "unicorn", "valley", "vanilla", "velvet", "violet", "walrus",
    "willow", "winter", "yellow", "yeti", "zebra", "zenith",
];

/// Generate a random codephrase: a four digit pin and `words` words.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the OS CSPRNG fails.
pub fn generate(words: usize) -> Result<String, CryptoError> {
    let pin = random_index(10_000)?;
    let mut parts = vec![format!("{pin:04}")];
    for _ in 0..words {
        let i = random_index(WORDS.len() as u32)? as usize;
        parts.push(WORDS[i].to_string());
    }
    Ok(parts.join("-"))
}

/// Reject codephrases too short to be meaningful.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidParameter`] when the codephrase is shorter
/// than [`MIN_CODEPHRASE_LEN`] characters.
pub fn validate(codephrase: &str) -> Result<(), CryptoError> {
    if codephrase.chars().count() < MIN_CODEPHRASE_LEN {
        return Err(CryptoError::InvalidParameter(
            "codephrase is too short".into(),
        ));
    }
    Ok(())
}
