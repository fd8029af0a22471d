//! Format-preserving key edits
//!
//! Rewriting a whole YAML file through a parser loses its comments. When the
//! target key is a plain scalar in block style, only the value text on its
//! line is replaced. Anything fancier (flow style, anchors, block scalars,
//! list indices) returns `None` and the caller falls back to a full
//! parse/serialize.

use confsync_model::format::PropertiesCodec;
use confsync_model::{ConfigTree, KeyPath};

use crate::lines::LineBuffer;

/// A `key: value` line in block YAML
#[derive(Debug)]
struct YamlEntry {
    indent: usize,
    key: String,
    value_start: usize,
    value_end: usize,
}

fn leading_spaces(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn is_skippable(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#') || t == "---"
}

/// End of a quoted token starting at `body[0]`
fn closing_quote(body: &str) -> Option<usize> {
    let quote = body.chars().next()?;
    let mut escaped = false;
    for (i, c) in body.char_indices().skip(1) {
        match c {
            '\\' if quote == '"' && !escaped => escaped = true,
            c if c == quote && !escaped => return Some(i),
            _ => escaped = false,
        }
    }
    None
}

fn parse_entry(line: &str) -> Option<YamlEntry> {
    if is_skippable(line) {
        return None;
    }
    let indent = leading_spaces(line);
    let body = &line[indent..];
    if body.starts_with('-') || body.starts_with('?') {
        return None;
    }

    let (key, colon) = if body.starts_with(['"', '\'']) {
        let end = closing_quote(body)?;
        if body[end + 1..].starts_with(':') {
            (body[1..end].to_string(), end + 1)
        } else {
            return None;
        }
    } else {
        let colon = body
            .match_indices(':')
            .map(|(i, _)| i)
            .find(|&i| body[i + 1..].is_empty() || body[i + 1..].starts_with([' ', '\t']))?;
        (body[..colon].trim_end().to_string(), colon)
    };

    let after = colon + 1;
    let rest = &body[after..];
    let value_offset = rest.len() - rest.trim_start().len();
    let value = rest.trim_start();
    let value_len = if value.starts_with(['"', '\'']) {
        closing_quote(value).map_or(value.len(), |end| end + 1)
    } else {
        value
            .find(" #")
            .map_or(value.trim_end().len(), |i| value[..i].trim_end().len())
    };

    let value_start = indent + after + value_offset;
    Some(YamlEntry {
        indent,
        key,
        value_start,
        value_end: value_start + value_len,
    })
}

fn plain_scalar(text: &str) -> bool {
    !text.is_empty() && !text.starts_with(['|', '>', '[', '{', '&', '*', '!'])
}

fn yaml_scalar_text(value: &ConfigTree) -> Option<String> {
    if !matches!(value, ConfigTree::Scalar(_)) {
        return None;
    }
    let text = serde_yaml::to_string(&value.to_yaml()).ok()?;
    let text = text.trim_end();
    (!text.contains('\n')).then(|| text.to_string())
}

/// Replace a scalar value in block YAML without touching other lines
///
/// Returns `None` when the key is not found as a simple scalar line.
#[must_use]
pub fn set_yaml_scalar(buf: &mut LineBuffer, path: &KeyPath, value: &ConfigTree) -> Option<()> {
    let rendered = yaml_scalar_text(value)?;
    let segments = path.segments();
    let last = segments.len().checked_sub(1)?;

    let mut parent_indent: Option<usize> = None;
    let mut start = 0;
    for (depth, segment) in segments.iter().enumerate() {
        let mut block_indent = None;
        let mut found = None;

        for (i, line) in buf.lines().iter().enumerate().skip(start) {
            if is_skippable(line) {
                continue;
            }
            let indent = leading_spaces(line);
            if parent_indent.is_some_and(|p| indent <= p) {
                break;
            }
            let Some(entry) = parse_entry(line) else {
                continue;
            };
            let block = *block_indent.get_or_insert(entry.indent);
            if entry.indent == block && entry.key == *segment {
                found = Some((i, entry));
                break;
            }
        }

        let (index, entry) = found?;
        let line = &buf.lines()[index];
        let current = &line[entry.value_start..entry.value_end];

        if depth < last {
            if !current.is_empty() {
                return None;
            }
            parent_indent = Some(entry.indent);
            start = index + 1;
            continue;
        }

        if !plain_scalar(current) {
            return None;
        }
        let mut new_line = String::with_capacity(line.len() + rendered.len());
        new_line.push_str(&line[..entry.value_start]);
        new_line.push_str(&rendered);
        new_line.push_str(&line[entry.value_end..]);
        buf.set_line(index, new_line);
        return Some(());
    }
    None
}

/// Set `key` in a properties file, editing its line in place or appending
///
/// Returns the previous raw value, if the key existed.
pub fn set_property(buf: &mut LineBuffer, key: &str, value: &str) -> Option<String> {
    let mut continued = false;
    let mut target = None;
    for (i, line) in buf.lines().iter().enumerate() {
        let is_continuation = continued;
        continued = line.ends_with('\\');
        if is_continuation {
            continue;
        }
        if let Some((k, _)) = PropertiesCodec::split_entry(line) {
            if k == key {
                target = Some(i);
            }
        }
    }

    let Some(index) = target else {
        buf.push_line(format!("{key}={value}"));
        return None;
    };

    let line = buf.lines()[index].clone();
    let lead = line.len() - line.trim_start().len();
    let trimmed = &line[lead..];
    let (new_line, previous) = match trimmed.find(['=', ':']) {
        Some(sep) => {
            let after = &trimmed[sep + 1..];
            let value_start = lead + sep + 1 + (after.len() - after.trim_start().len());
            (
                format!("{}{value}", &line[..value_start]),
                line[value_start..].to_string(),
            )
        }
        None => (format!("{}={value}", line.trim_end()), String::new()),
    };

    // Drop continuation lines of the old value
    let mut tail = line.ends_with('\\');
    while tail && index + 1 < buf.lines().len() {
        tail = buf.lines()[index + 1].ends_with('\\');
        buf.remove_line(index + 1);
    }

    buf.set_line(index, new_line);
    Some(previous.trim_end_matches('\\').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_model::FileFormat;
    use pretty_assertions::assert_eq;

    fn path(s: &str) -> KeyPath {
        s.parse().unwrap()
    }

    fn yaml_set(text: &str, key: &str, value: ConfigTree) -> Option<String> {
        let mut buf = LineBuffer::parse(text);
        set_yaml_scalar(&mut buf, &path(key), &value)?;
        Some(buf.render())
    }

    #[test]
    fn top_level_scalar_keeps_comments() {
        let text = "# header\nx: 2 # tuned\ny: 1\n";
        let out = yaml_set(text, "x", ConfigTree::int(3)).unwrap();
        assert_eq!(out, "# header\nx: 3 # tuned\ny: 1\n");
    }

    #[test]
    fn nested_scalar() {
        let text = "chat:\n  # radius in blocks\n  radius: 0\n  format: '<{name}> {msg}'\nother:\n  radius: 9\n";
        let out = yaml_set(text, "chat.radius", ConfigTree::int(64)).unwrap();
        assert_eq!(
            out,
            "chat:\n  # radius in blocks\n  radius: 64\n  format: '<{name}> {msg}'\nother:\n  radius: 9\n"
        );
        let tree = FileFormat::Yaml.parse(&out).unwrap();
        assert_eq!(tree.get(&path("other.radius")), Some(&ConfigTree::int(9)));
    }

    #[test]
    fn does_not_cross_into_sibling_block() {
        let text = "a:\n  x: 1\nb:\n  y: 2\n";
        assert_eq!(yaml_set(text, "a.y", ConfigTree::int(5)), None);
    }

    #[test]
    fn quoted_values_and_strings() {
        let text = "motd: \"Hello # not a comment\"\n";
        let out = yaml_set(text, "motd", ConfigTree::string("Bye")).unwrap();
        assert_eq!(out, "motd: Bye\n");
        let out = yaml_set("flag: off\n", "flag", ConfigTree::string("yes")).unwrap();
        let tree = FileFormat::Yaml.parse(&out).unwrap();
        assert_eq!(tree.get(&path("flag")), Some(&ConfigTree::string("yes")));
    }

    #[test]
    fn falls_back_on_complex_shapes() {
        assert_eq!(yaml_set("x: [1, 2]\n", "x", ConfigTree::int(1)), None);
        assert_eq!(yaml_set("x: |\n  text\n", "x", ConfigTree::int(1)), None);
        assert_eq!(yaml_set("missing: 1\n", "x", ConfigTree::int(1)), None);
        let list = ConfigTree::from_json(serde_json::json!([1]));
        assert_eq!(yaml_set("x: 1\n", "x", list), None);
    }

    #[test]
    fn property_edit_in_place() {
        let mut buf = LineBuffer::parse("# comment\nmax-players = 20\nmotd=hi\n");
        let prev = set_property(&mut buf, "max-players", "50");
        assert_eq!(prev.as_deref(), Some("20"));
        assert_eq!(buf.render(), "# comment\nmax-players = 50\nmotd=hi\n");
    }

    #[test]
    fn property_appended_when_missing() {
        let mut buf = LineBuffer::parse("motd=hi\n");
        assert_eq!(set_property(&mut buf, "pvp", "false"), None);
        assert_eq!(buf.render(), "motd=hi\npvp=false\n");
    }

    #[test]
    fn property_continuation_replaced() {
        let mut buf = LineBuffer::parse("motd=one \\\n  two\nx=1\n");
        set_property(&mut buf, "motd", "three");
        assert_eq!(buf.render(), "motd=three\nx=1\n");
    }
}
