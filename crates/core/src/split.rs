//! Splitting long replies into platform-sized messages.

use unicode_segmentation::UnicodeSegmentation;

/// Splits `text` into chunks of at most `max_chars` characters.
///
/// Chunks only end on extended grapheme cluster boundaries, so a base
/// character is never separated from its combining marks, joiners or
/// modifiers, and CRLF stays together. Cuts prefer line and sentence
/// boundaries, then any whitespace, in the second half of each window.
/// Concatenating the chunks yields `text`.
pub fn split_into_shorter_messages(
    text: &str,
    max_chars: usize,
) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = vec![];
    let mut rest = text;

    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(find_cut(rest, max_chars));
        chunks.push(chunk.to_owned());
        rest = tail;
    }
    chunks
}

// The end of a grapheme cluster that fits in the window.
struct Boundary<'a> {
    // Byte offset just past the cluster.
    end: usize,
    // Characters up to and including the cluster.
    chars: usize,
    cluster: &'a str,
}

// Returns the byte length of the next chunk.
fn find_cut(text: &str, max_chars: usize) -> usize {
    let mut window: Vec<Boundary<'_>> = vec![];
    let mut chars = 0;
    for (offset, cluster) in text.grapheme_indices(true) {
        chars += cluster.chars().count();
        if chars > max_chars {
            break;
        }
        window.push(Boundary {
            end: offset + cluster.len(),
            chars,
            cluster,
        });
    }

    let Some(last) = window.last() else {
        // A single cluster longer than the limit is cut at the limit anyway.
        return text
            .char_indices()
            .nth(max_chars)
            .map_or(text.len(), |(offset, _)| offset);
    };
    if last.end == text.len() {
        return last.end;
    }

    let lower = (max_chars / 2).max(1);
    let first = window
        .iter()
        .position(|b| b.chars >= lower)
        .unwrap_or(window.len());
    let mut candidates = (first..window.len()).rev();

    let sentence_end = candidates.clone().find(|&i| {
        let cluster = window[i].cluster;
        cluster.contains('\n')
            || (is_blank(cluster)
                && i > 0
                && window[i - 1].cluster.ends_with(['.', '!', '?']))
    });
    if let Some(i) = sentence_end {
        return window[i].end;
    }

    let word_end = candidates.find(|&i| is_blank(window[i].cluster));
    if let Some(i) = word_end {
        return window[i].end;
    }

    last.end
}

#[inline]
fn is_blank(cluster: &str) -> bool {
    cluster.chars().all(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(text: &str, max_chars: usize) -> Vec<String> {
        let chunks = split_into_shorter_messages(text, max_chars);
        for chunk in &chunks {
            assert!(!chunk.is_empty());
            assert!(
                chunk.chars().count() <= max_chars,
                "chunk {chunk:?} is over {max_chars}"
            );
        }
        assert_eq!(chunks.concat(), text);
        chunks
    }

    #[test]
    fn test_empty_text() {
        assert!(split_into_shorter_messages("", 10).is_empty());
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(check("hello", 10), vec!["hello"]);
        assert_eq!(check("0123456789", 10), vec!["0123456789"]);
    }

    #[test]
    fn test_prefers_sentence_end() {
        let chunks = check("One two. Three four five", 16);
        assert_eq!(chunks, vec!["One two. ", "Three four five"]);
    }

    #[test]
    fn test_prefers_newline() {
        let chunks = check("first line\nsecond line", 16);
        assert_eq!(chunks[0], "first line\n");
    }

    #[test]
    fn test_falls_back_to_word_end() {
        let chunks = check("alpha beta gamma delta", 12);
        assert_eq!(chunks, vec!["alpha beta ", "gamma delta"]);
    }

    #[test]
    fn test_hard_cut_without_whitespace() {
        let text = "x".repeat(25);
        let chunks = check(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], "xxxxx");
    }

    #[test]
    fn test_keeps_combining_marks() {
        // The accent combining with "e" would start the second chunk.
        let text = format!("{}e\u{0301}{}", "a".repeat(9), "b".repeat(6));
        let chunks = check(&text, 10);
        assert_eq!(chunks[0], "a".repeat(9));
        assert!(chunks[1].starts_with("e\u{0301}"));
    }

    #[test]
    fn test_keeps_emoji_sequences() {
        // family: man ZWJ woman ZWJ girl
        let family = "\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467}";
        let text = format!("{}{family}", "a".repeat(7));
        let chunks = check(&text, 10);
        assert_eq!(chunks[0], "a".repeat(7));
        assert_eq!(chunks[1], family);

        let flag = "\u{1F1EF}\u{1F1F5}";
        let text = format!("{}{flag}", "a".repeat(9));
        let chunks = check(&text, 10);
        assert_eq!(chunks, vec!["a".repeat(9), flag.to_owned()]);
    }

    #[test]
    fn test_keeps_spacing_marks() {
        // KA followed by the vowel sign I is a single cluster.
        let ki = "\u{0915}\u{093F}";
        let text = format!("{}{ki}{}", "a".repeat(9), "b".repeat(6));
        let chunks = check(&text, 10);
        assert_eq!(
            chunks,
            vec!["a".repeat(9), format!("{ki}{}", "b".repeat(6))]
        );

        // Hangul syllable spelled as conjoining jamo.
        let syllable = "\u{1100}\u{1161}\u{11A8}";
        let text = format!("{}{syllable}", "a".repeat(8));
        let chunks = check(&text, 10);
        assert_eq!(chunks, vec!["a".repeat(8), syllable.to_owned()]);
    }

    #[test]
    fn test_keeps_crlf() {
        let chunks = check("aaaaaaa.\r\nbbbbbbbb", 9);
        assert_eq!(chunks[0], "aaaaaaa.");
        assert!(chunks[1].starts_with("\r\n"));
        assert!(chunks.iter().all(|chunk| !chunk.starts_with('\n')));

        let chunks = check("one two\r\nthree four", 12);
        assert_eq!(chunks[0], "one two\r\n");
    }

    #[test]
    fn test_oversized_cluster_is_cut() {
        let text = format!("e{}", "\u{0301}".repeat(12));
        let chunks = check(&text, 10);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_long_reply_chunks() {
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        let text = sentence.repeat(80);
        let chunks = check(&text, 1500);
        assert!(chunks.len() >= 2);
    }
}
