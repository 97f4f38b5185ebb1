#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is free text (an instruction).
pub(crate) const TEXT_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "edit",
        action: "edit",
    },
    CommandSpec {
        command: "animate",
        action: "animate",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "camera",
        action: "open_camera",
    },
    CommandSpec {
        command: "context",
        action: "load_context",
    },
    CommandSpec {
        command: "export",
        action: "export",
    },
];

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "backend",
    action: "set_backend",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "capture",
        action: "capture",
    },
    CommandSpec {
        command: "camera_close",
        action: "close_camera",
    },
    CommandSpec {
        command: "undo",
        action: "undo",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "frame",
        action: "frame",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
];

pub const STUDIO_HELP_COMMANDS: &[&str] = &[
    "/generate",
    "/edit <instruction>",
    "/animate <motion>",
    "/undo",
    "/camera <still.png>",
    "/capture",
    "/camera_close",
    "/export [dir]",
    "/context <context.json>",
    "/backend <name>",
    "/frame",
    "/status",
    "/help",
    "/quit",
];
