use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{CommandSpec, COMMANDS};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.command_args.get(key).and_then(Value::as_str)
    }
}

fn find_spec(command: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.command == command)
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn bind_args(spec: &CommandSpec, text: &str, arg: &str) -> Intent {
    let mut tokens = split_args(arg).into_iter();
    let mut intent = Intent::new(spec.action, text);
    for param in spec.params {
        let (name, optional) = match param.strip_suffix('?') {
            Some(name) => (name, true),
            None => (*param, false),
        };
        match tokens.next() {
            Some(value) => {
                intent
                    .command_args
                    .insert(name.to_string(), Value::String(value));
            }
            None if optional => {}
            None => {
                let mut invalid = Intent::new("invalid", text);
                invalid.command_args.insert(
                    "error".to_string(),
                    Value::String(format!("Missing <{name}>. Usage: {}", spec.usage)),
                );
                return invalid;
            }
        }
    }

    let remainder: Vec<String> = tokens.collect();
    match spec.rest {
        Some(key) => {
            if remainder.is_empty() {
                let mut invalid = Intent::new("invalid", text);
                invalid.command_args.insert(
                    "error".to_string(),
                    Value::String(format!("Missing <{key}>. Usage: {}", spec.usage)),
                );
                return invalid;
            }
            intent
                .command_args
                .insert(key.to_string(), Value::String(remainder.join(" ")));
        }
        None if !remainder.is_empty() => {
            intent.command_args.insert(
                "extra".to_string(),
                Value::Array(remainder.into_iter().map(Value::String).collect()),
            );
        }
        None => {}
    }
    intent
}

/// Parses one shell line. Slash commands map onto canvas actions; any other
/// text becomes the prompt of the selected node.
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(spec) = find_spec(&command) {
                return bind_args(spec, text, arg);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("set_selected_prompt", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;
    use crate::commands::help_lines;

    #[test]
    fn parse_add_with_and_without_position() {
        let bare = parse_intent("/add image");
        assert_eq!(bare.action, "add_node");
        assert_eq!(bare.arg("kind"), Some("image"));
        assert!(bare.arg("x").is_none());

        let placed = parse_intent("/add video 120 40");
        assert_eq!(placed.arg("x"), Some("120"));
        assert_eq!(placed.arg("y"), Some("40"));
    }

    #[test]
    fn parse_connect_requires_both_ends() {
        let ok = parse_intent("/connect 1 2");
        assert_eq!(ok.action, "connect");
        assert_eq!(ok.command_args["source"], json!("1"));
        assert_eq!(ok.command_args["target"], json!("2"));

        let missing = parse_intent("/connect 1");
        assert_eq!(missing.action, "invalid");
        assert_eq!(
            missing.arg("error"),
            Some("Missing <target>. Usage: /connect <source> <target>")
        );
    }

    #[test]
    fn parse_prompt_collects_quoted_rest() {
        let intent = parse_intent("/prompt 3 \"a quiet lake\" at dawn");
        assert_eq!(intent.action, "set_prompt");
        assert_eq!(intent.arg("node"), Some("3"));
        assert_eq!(intent.arg("text"), Some("a quiet lake at dawn"));

        let model = parse_intent("/model 2 Flux Pro 1.1");
        assert_eq!(model.arg("model"), Some("Flux Pro 1.1"));

        assert_eq!(parse_intent("/prompt 3").action, "invalid");
    }

    #[test]
    fn parse_turn_into_and_paths() {
        let intent = parse_intent("/turn_into 4 source video");
        assert_eq!(intent.action, "create_from_connect");
        assert_eq!(intent.arg("handle"), Some("source"));
        assert_eq!(intent.arg("kind"), Some("video"));

        let save = parse_intent("/save \"/tmp/my flow.json\"");
        assert_eq!(save.action, "save");
        assert_eq!(save.arg("path"), Some("/tmp/my flow.json"));
    }

    #[test]
    fn parse_run_variants() {
        assert_eq!(parse_intent("/run").action, "run_flow");
        assert_eq!(parse_intent("/RUN topological").arg("order"), Some("topological"));
        assert_eq!(parse_intent("/run_node 5").arg("node"), Some("5"));
    }

    #[test]
    fn plain_text_sets_selected_prompt() {
        let intent = parse_intent("  misty mountains  ");
        assert_eq!(intent.action, "set_selected_prompt");
        assert_eq!(intent.prompt.as_deref(), Some("misty mountains"));
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }

    #[test]
    fn help_lists_every_command() {
        let lines = help_lines();
        assert!(lines.contains(&"/help"));
        assert!(lines.iter().any(|line| line.starts_with("/turn_into")));
    }
}
