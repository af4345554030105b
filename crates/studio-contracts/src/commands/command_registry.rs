#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    /// Positional argument names; a trailing `?` marks an optional one.
    pub params: &'static [&'static str],
    /// Key collecting every token after the positional arguments.
    pub rest: Option<&'static str>,
    pub usage: &'static str,
}

pub(crate) const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "add",
        action: "add_node",
        params: &["kind", "x?", "y?"],
        rest: None,
        usage: "/add <text|image|video> [x y]",
    },
    CommandSpec {
        command: "connect",
        action: "connect",
        params: &["source", "target"],
        rest: None,
        usage: "/connect <source> <target>",
    },
    CommandSpec {
        command: "disconnect",
        action: "disconnect",
        params: &["edge", "target?"],
        rest: None,
        usage: "/disconnect <edge-id> | <source> <target>",
    },
    CommandSpec {
        command: "delete",
        action: "delete_node",
        params: &["node"],
        rest: None,
        usage: "/delete <node>",
    },
    CommandSpec {
        command: "duplicate",
        action: "duplicate_node",
        params: &["node"],
        rest: None,
        usage: "/duplicate <node>",
    },
    CommandSpec {
        command: "copy",
        action: "copy_node",
        params: &["node"],
        rest: None,
        usage: "/copy <node>",
    },
    CommandSpec {
        command: "paste",
        action: "paste_node",
        params: &["x?", "y?"],
        rest: None,
        usage: "/paste [x y]",
    },
    CommandSpec {
        command: "turn_into",
        action: "create_from_connect",
        params: &["node", "handle", "kind"],
        rest: None,
        usage: "/turn_into <node> <source|target> <text|image|video>",
    },
    CommandSpec {
        command: "select",
        action: "select_node",
        params: &["node"],
        rest: None,
        usage: "/select <node>",
    },
    CommandSpec {
        command: "prompt",
        action: "set_prompt",
        params: &["node"],
        rest: Some("text"),
        usage: "/prompt <node> <text>",
    },
    CommandSpec {
        command: "model",
        action: "set_model",
        params: &["node"],
        rest: Some("model"),
        usage: "/model <node> <label>",
    },
    CommandSpec {
        command: "ratio",
        action: "set_ratio",
        params: &["node", "ratio"],
        rest: None,
        usage: "/ratio <node> <ratio>",
    },
    CommandSpec {
        command: "run",
        action: "run_flow",
        params: &["order?"],
        rest: None,
        usage: "/run [insertion|topological]",
    },
    CommandSpec {
        command: "run_node",
        action: "run_node",
        params: &["node"],
        rest: None,
        usage: "/run_node <node>",
    },
    CommandSpec {
        command: "show",
        action: "show",
        params: &["node?"],
        rest: None,
        usage: "/show [node]",
    },
    CommandSpec {
        command: "models",
        action: "list_models",
        params: &["node?"],
        rest: None,
        usage: "/models [node|text|image|video]",
    },
    CommandSpec {
        command: "download",
        action: "download",
        params: &["node", "path?"],
        rest: None,
        usage: "/download <node> [path]",
    },
    CommandSpec {
        command: "save",
        action: "save",
        params: &["path"],
        rest: None,
        usage: "/save <path>",
    },
    CommandSpec {
        command: "load",
        action: "load",
        params: &["path"],
        rest: None,
        usage: "/load <path>",
    },
    CommandSpec {
        command: "help",
        action: "help",
        params: &[],
        rest: None,
        usage: "/help",
    },
];

pub fn help_lines() -> Vec<&'static str> {
    COMMANDS.iter().map(|spec| spec.usage).collect()
}
