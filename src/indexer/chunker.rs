//! Sliding-window text chunker with overlap

/// Splits article text into fixed-size windows. Boundaries are measured in
/// characters, not bytes, so multi-byte Cyrillic text never splits inside a
/// code point.
pub struct SimpleChunker {
    chunk_size: usize,
    overlap: usize,
}

impl SimpleChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        debug_assert!(overlap < chunk_size);
        Self {
            chunk_size,
            overlap,
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.trim().chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        let n = chars.len();
        while start < n {
            let end = n.min(start + self.chunk_size);
            chunks.push(chars[start..end].iter().collect());
            if end >= n {
                break;
            }
            start = end.saturating_sub(self.overlap);
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunker = SimpleChunker::new(10, 2);
        assert!(chunker.split("").is_empty());
        assert!(chunker.split("   ").is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = SimpleChunker::new(100, 10);
        assert_eq!(chunker.split("короткий текст"), vec!["короткий текст"]);
    }

    #[test]
    fn windows_overlap() {
        let chunker = SimpleChunker::new(5, 2);
        let chunks = chunker.split("abcdefghij");
        assert_eq!(chunks[0], "abcde");
        // next window starts 2 characters back
        assert_eq!(chunks[1], "defgh");
        assert!(chunks.last().unwrap().chars().count() <= 5);

        // every character of the input is covered
        let joined: String = chunks.concat();
        for c in "abcdefghij".chars() {
            assert!(joined.contains(c));
        }
    }

    #[test]
    fn cyrillic_boundaries_are_character_aligned() {
        let chunker = SimpleChunker::new(4, 1);
        let chunks = chunker.split("привет мир");
        assert_eq!(chunks[0], "прив");
        assert_eq!(chunks[0].chars().count(), 4);
    }
}
