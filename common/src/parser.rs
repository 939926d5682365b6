use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub path: String,
    pub params: BTreeMap<String, String>,
}

impl ParsedRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Returns `None` until the blank-line terminator has arrived; the caller
/// keeps accumulating bytes. Only the first terminator counts, anything
/// after it is ignored for this connection. Parameter values run from the
/// `name=` marker to the next whitespace, or to the end of the captured
/// text when nothing terminates them. The control link is a private
/// trusted network, so the extraction stays lenient by design of the
/// wire format (bare `name=value` tokens, no URL encoding).
pub fn parse(request_text: &str) -> Option<ParsedRequest> {
    let head = terminated_head(request_text)?;

    let request_line = head.lines().next().unwrap_or("");
    let mut tokens = request_line.split_whitespace();
    let _method = tokens.next()?;
    let path = tokens.next()?.to_string();

    Some(ParsedRequest {
        path,
        params: collect_params(head),
    })
}

fn terminated_head(text: &str) -> Option<&str> {
    if let Some(end) = text.find("\r\n\r\n") {
        return Some(&text[..end]);
    }
    text.find("\n\n").map(|end| &text[..end])
}

fn is_key_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn collect_params(text: &str) -> BTreeMap<String, String> {
    let bytes = text.as_bytes();
    let mut params = BTreeMap::new();

    for index in (0..bytes.len()).filter(|at| bytes[*at] == b'=') {
        let key_start = bytes[..index]
            .iter()
            .rposition(|byte| !is_key_byte(*byte))
            .map(|at| at + 1)
            .unwrap_or(0);
        if key_start == index {
            continue;
        }
        let key = String::from_utf8_lossy(&bytes[key_start..index]).into_owned();

        let rest = &bytes[index + 1..];
        let value_end = rest
            .iter()
            .position(|byte| byte.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let value = String::from_utf8_lossy(&rest[..value_end]).into_owned();

        params.entry(key).or_insert(value);
    }

    params
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn extracts_path_from_request_line() {
        let parsed = parse("GET /mode/jump-delay HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(parsed.path, "/mode/jump-delay");
    }

    #[test]
    fn incomplete_request_keeps_accumulating() {
        assert_eq!(parse("GET /mode/jump-delay HTTP/1.1\r\nHost: x\r\n"), None);
        assert_eq!(parse("GET /mode/"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn param_value_ends_at_space() {
        let parsed =
            parse("GET /favorite-number?favoriteNumberInput=7 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(parsed.path, "/favorite-number?favoriteNumberInput=7");
        assert_eq!(parsed.param("favoriteNumberInput"), Some("7"));
    }

    #[test]
    fn unterminated_value_runs_to_end_of_captured_text() {
        let parsed = parse("GET /delay-number?delayNumberInput=45\r\n\r\n").unwrap();
        assert_eq!(parsed.param("delayNumberInput"), Some("45"));
    }

    #[test]
    fn ampersand_is_not_a_value_terminator() {
        // Known leniency of the bare-token wire format; the second pair is
        // still found on its own.
        let parsed = parse("GET /x?a=1&b=2 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(parsed.param("a"), Some("1&b=2"));
        assert_eq!(parsed.param("b"), Some("2"));
    }

    #[test]
    fn only_first_terminator_counts() {
        let parsed = parse("GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(parsed.path, "/one");
    }

    #[test]
    fn missing_param_is_absent() {
        let parsed = parse("GET /favorite-number HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(parsed.param("favoriteNumberInput"), None);
    }

    #[test]
    fn bare_newlines_also_terminate() {
        let parsed = parse("GET /mode/off HTTP/1.1\nHost: x\n\n").unwrap();
        assert_eq!(parsed.path, "/mode/off");
    }
}
