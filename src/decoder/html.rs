//! Best-effort HTML → plain text for bodies without a text/plain part.

/// Strip tags, drop `<script>`/`<style>` contents, decode common entities
/// and collapse whitespace. A `<` not followed by a letter, `/` or `!` is
/// plain text.
pub fn html_to_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut tag = String::new();
    let mut skip_until: Option<&'static str> = None;
    let mut chars = html.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '<' if in_tag || chars.peek().is_some_and(|&c| starts_markup(c)) => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag
                    .trim_start_matches('/')
                    .split(|c: char| c.is_whitespace() || c == '/')
                    .next()
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                let closing = tag.starts_with('/');
                match (skip_until, closing, name.as_str()) {
                    (Some(end), true, n) if n == end => skip_until = None,
                    (None, false, "script") => skip_until = Some("script"),
                    (None, false, "style") => skip_until = Some("style"),
                    _ => {}
                }
                // Tags separate words
                text.push(' ');
            }
            _ if in_tag => tag.push(ch),
            _ if skip_until.is_some() => {}
            _ => text.push(ch),
        }
    }

    let decoded = decode_entities(&text);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn starts_markup(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '/' || c == '!'
}

/// Decode named entities the mail corpus actually uses plus numeric ones.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| entity_char(&after[..end]).map(|ch| (ch, end)));

        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn entity_char(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    Some(match name {
        "nbsp" => ' ',
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "laquo" => '«',
        "raquo" => '»',
        "mdash" => '—',
        "ndash" => '–',
        "hellip" => '…',
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_basic_tags() {
        assert_eq!(html_to_text("<p>Hello</p>"), "Hello");
    }

    #[test]
    fn tags_separate_words() {
        assert_eq!(html_to_text("one<br>two<div>three</div>"), "one two three");
    }

    #[test]
    fn attributes_are_dropped() {
        assert_eq!(
            html_to_text(r#"<a href="https://example.com">Link</a>"#),
            "Link"
        );
    }

    #[test]
    fn script_and_style_removed() {
        let html = "<style>p { color: red }</style><p>Visible</p><script>var x = 1;</script>";
        assert_eq!(html_to_text(html), "Visible");
    }

    #[test]
    fn entities_decoded() {
        assert_eq!(
            html_to_text("Tom&nbsp;&amp;&nbsp;Jerry &lt;3 &#8470;5 &#x41;"),
            "Tom & Jerry <3 №5 A"
        );
    }

    #[test]
    fn unknown_entity_kept() {
        assert_eq!(decode_entities("a &bogus; b & c"), "a &bogus; b & c");
    }

    #[test]
    fn dates_survive_conversion() {
        let html = "<table><tr><td>Оплата до</td><td><b>15.03.2025</b></td></tr></table>";
        assert_eq!(html_to_text(html), "Оплата до 15.03.2025");
    }

    #[test]
    fn bare_less_than_is_text() {
        let html = "<p>Pay if amount < 500, due 01.04.2025</p>";
        assert_eq!(html_to_text(html), "Pay if amount < 500, due 01.04.2025");
        assert_eq!(html_to_text("a<b>c</b> 3<4 <!-- x -->"), "a c 3<4");
    }
}
