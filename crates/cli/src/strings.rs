// Terminal strings and labels. ASCII-friendly by default.

// User input prompt
pub const PREFIX_USER: &str = "| ";
// Assistant replies
pub const PREFIX_ASSISTANT: &str = "> ";

pub const WELCOME: &str = "Connected to chat relay at";

pub const HELP: &str = "Commands: /new (fresh conversation), /pod start|stop, /help, /quit. Ctrl-C cancels a reply in flight.";

/// Appended as the assistant turn when a reply fails.
pub const APOLOGY: &str = "Sorry, I encountered an error. Please try again.";

pub const ERROR_MARKER: &str = "[error]";
pub const CANCELED_MARKER: &str = "[canceled]";

pub fn info_line(msg: &str) -> String {
    format!("[info] {}", msg)
}

pub fn error_line(msg: &str) -> String {
    format!("{} {}", ERROR_MARKER, msg)
}

pub fn pod_status_line(start: bool, data: &serde_json::Value) -> String {
    let op = if start { "podResume" } else { "podStop" };
    let status = data["data"]["data"][op]["desiredStatus"]
        .as_str()
        .unwrap_or("requested");
    info_line(&format!(
        "pod {}: {}",
        if start { "start" } else { "stop" },
        status
    ))
}
