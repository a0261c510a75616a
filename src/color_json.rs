//! Purpose: Render pretty JSON with optional ANSI colorization for CLI output.
//! Exports: colorize_json.
//! Invariants: When color is disabled, output equals serde_json::to_string_pretty.
use serde_json::Value;

const INDENT: &str = "  ";

// 8/16-color codes only; bright variants lose contrast on some themes.
const COLOR_KEY: &str = "36";
const COLOR_STRING: &str = "32";
const COLOR_NUMBER: &str = "33";
const COLOR_BOOL: &str = "35";
const COLOR_PLAIN: &str = "39";

pub fn colorize_json(value: &Value, use_color: bool) -> String {
    let mut painter = Painter {
        out: String::new(),
        use_color,
    };
    painter.value(value, 0);
    painter.out
}

struct Painter {
    out: String,
    use_color: bool,
}

impl Painter {
    fn value(&mut self, value: &Value, depth: usize) {
        match value {
            Value::Null => self.paint("null", COLOR_PLAIN),
            Value::Bool(flag) => self.paint(if *flag { "true" } else { "false" }, COLOR_BOOL),
            Value::Number(num) => self.paint(&num.to_string(), COLOR_NUMBER),
            Value::String(text) => self.paint(&quoted(text), COLOR_STRING),
            Value::Array(items) => {
                self.container('[', ']', items.len(), depth, |painter, idx| {
                    painter.value(&items[idx], depth + 1);
                });
            }
            Value::Object(map) => {
                let entries: Vec<(&String, &Value)> = map.iter().collect();
                self.container('{', '}', entries.len(), depth, |painter, idx| {
                    let (key, value) = entries[idx];
                    painter.paint(&quoted(key), COLOR_KEY);
                    painter.paint(":", COLOR_PLAIN);
                    painter.out.push(' ');
                    painter.value(value, depth + 1);
                });
            }
        }
    }

    fn container<F>(&mut self, open: char, close: char, len: usize, depth: usize, mut item: F)
    where
        F: FnMut(&mut Self, usize),
    {
        if len == 0 {
            self.paint(&format!("{open}{close}"), COLOR_PLAIN);
            return;
        }
        self.paint(&open.to_string(), COLOR_PLAIN);
        self.out.push('\n');
        for idx in 0..len {
            self.indent(depth + 1);
            item(self, idx);
            if idx + 1 < len {
                self.paint(",", COLOR_PLAIN);
            }
            self.out.push('\n');
        }
        self.indent(depth);
        self.paint(&close.to_string(), COLOR_PLAIN);
    }

    fn indent(&mut self, depth: usize) {
        self.out.push_str(&INDENT.repeat(depth));
    }

    fn paint(&mut self, text: &str, color: &str) {
        if self.use_color {
            self.out.push_str(&format!("\u{1b}[{color}m{text}\u{1b}[0m"));
        } else {
            self.out.push_str(text);
        }
    }
}

fn quoted(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::colorize_json;
    use serde_json::json;

    #[test]
    fn plain_output_matches_serde_pretty() {
        let value = json!({
            "files": [{"path": "/a", "label": null}, {"path": "/b", "label": "done"}],
            "empty": {},
            "none": [],
            "count": 2
        });
        let plain = colorize_json(&value, false);
        let pretty = serde_json::to_string_pretty(&value).expect("pretty");
        assert_eq!(plain, pretty);
    }

    #[test]
    fn colored_output_wraps_tokens() {
        let value = json!({"label":"pending","n":1,"ok":true,"z":null});
        let colored = colorize_json(&value, true);
        assert!(colored.contains("\u{1b}[36m\"label\"\u{1b}[0m"));
        assert!(colored.contains("\u{1b}[32m\"pending\"\u{1b}[0m"));
        assert!(colored.contains("\u{1b}[33m1\u{1b}[0m"));
        assert!(colored.contains("\u{1b}[35mtrue\u{1b}[0m"));
        assert!(colored.contains("\u{1b}[39mnull\u{1b}[0m"));
    }
}
