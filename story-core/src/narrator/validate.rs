//! Word-count policy for generated parts.

use crate::audience::TargetGroup;

/// Number of whitespace-delimited tokens.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Returns a correction prompt when `text` falls outside the tier's bounds.
///
/// Short text only triggers below the tier's soft minimum, so a part that
/// misses `min_words` by a little is accepted as is.
pub fn check(text: &str, target_group: TargetGroup) -> Option<String> {
    let profile = target_group.profile();
    let count = word_count(text);

    if (count as f64) < profile.soft_min_words() {
        Some(profile.too_short_prompt())
    } else if count > profile.max_words {
        Some(profile.too_long_prompt())
    } else {
        None
    }
}
