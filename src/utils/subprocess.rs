use tokio::process::Command;

/// Environment overrides that suppress interactive credential prompts in
/// spawned shells. Applied on top of an inherited environment rather than
/// a scrubbed allow-list.
const PROMPT_SUPPRESSING_OVERRIDES: &[(&str, &str)] = &[
    ("GIT_TERMINAL_PROMPT", "0"),
    ("GIT_ASKPASS", "echo"),
    ("SSH_ASKPASS", "echo"),
    ("DEBIAN_FRONTEND", "noninteractive"),
    ("SUDO_ASKPASS", "echo"),
];

/// Build a `sh -c <command>` invocation with the inherited environment plus
/// the prompt-suppressing overrides.
pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    for (key, value) in PROMPT_SUPPRESSING_OVERRIDES {
        cmd.env(key, value);
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_command_runs_and_captures_output() {
        let output = shell_command("echo hi").output().await.unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hi");
    }

    #[tokio::test]
    async fn shell_command_sets_prompt_suppressing_env() {
        let output = shell_command("echo $GIT_TERMINAL_PROMPT")
            .output()
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "0");
    }
}
