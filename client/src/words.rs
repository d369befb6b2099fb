//! Mnemonic word list for random endpoint names (e.g. happy-blue-frog).

use rand::Rng;

/// Short, memorable, URL-safe words.
const WORDS: &[&str] = &[
    "angel", "apple", "arrow", "beach", "bear", "bird", "blue", "boat", "bold",
    "bone", "book", "boss", "bush", "cake", "cash", "cat", "cave", "cold",
    "cord", "crab", "cube", "dark", "demo", "dice", "dock", "door", "dove",
    "dusk", "edge", "echo", "elm", "fall", "fern", "fire", "fish", "flag",
    "flat", "fog", "fork", "frog", "gold", "gray", "grey", "grid", "gulf",
    "happy", "harp", "hill", "hope", "iris", "iron", "java", "jazz", "key",
    "kite", "lake", "lamp", "lane", "leaf", "lime", "lion", "log", "map",
    "mask", "mint", "mist", "moon", "nova", "oak", "ocean", "olive", "opal",
    "pine", "pink", "pool", "port", "rain", "reed", "rock", "rose", "rust",
    "sand", "seed", "sky", "snow", "star", "sun", "surf", "swan", "tide",
    "tree", "vine", "wave", "wolf", "wood", "zen",
];

/// Three random words joined with `-`.
pub fn random_mnemonic_id() -> String {
    let mut rng = rand::thread_rng();
    let mut picks = Vec::with_capacity(3);
    for _ in 0..3 {
        picks.push(WORDS[rng.gen_range(0..WORDS.len())]);
    }
    picks.join("-")
}
