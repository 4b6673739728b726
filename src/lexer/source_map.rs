/// Byte offset to line lookup over one source text.
pub struct SourceMap {
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.bytes().enumerate().filter(|(_, b)| *b == b'\n').map(|(i, _)| i + 1))
            .collect();
        SourceMap { line_starts }
    }

    /// 1-based line containing `offset`.
    pub fn line(&self, offset: usize) -> u32 {
        match self.line_starts.binary_search(&offset) {
            Ok(i) => i as u32 + 1,
            Err(i) => i as u32,
        }
    }

    /// Text of a 1-based line without its terminator, or "" when out of range.
    pub fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        let Some(&start) = line.checked_sub(1).and_then(|i| self.line_starts.get(i)) else {
            return "";
        };
        let end = self.line_starts.get(line).copied().unwrap_or(source.len());
        source[start..end].trim_end_matches('\n').trim_end_matches('\r')
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_to_lines() {
        let src = "var a = 1\nvar b = 2\n\nreturn a + b";
        let sm = SourceMap::new(src);
        assert_eq!(sm.line(0), 1);
        assert_eq!(sm.line(9), 1); // the '\n' belongs to line 1
        assert_eq!(sm.line(10), 2);
        assert_eq!(sm.line(20), 3);
        assert_eq!(sm.line(21), 4);
        assert_eq!(sm.line_count(), 4);
    }

    #[test]
    fn line_text_strips_terminators() {
        let src = "first\r\nsecond\nthird";
        let sm = SourceMap::new(src);
        assert_eq!(sm.line_text(src, 1), "first");
        assert_eq!(sm.line_text(src, 2), "second");
        assert_eq!(sm.line_text(src, 3), "third");
        assert_eq!(sm.line_text(src, 0), "");
        assert_eq!(sm.line_text(src, 9), "");
    }

    #[test]
    fn empty_source_has_one_line() {
        let sm = SourceMap::new("");
        assert_eq!(sm.line(0), 1);
        assert_eq!(sm.line_text("", 1), "");
    }
}
