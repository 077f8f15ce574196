use nlfs::layout::SandboxLayout;
use nlfs::safety::{CommandValidator, Rejection, ValidationOutcome, normalize_command};

fn validator() -> CommandValidator {
    CommandValidator::new(SandboxLayout::default())
}

#[test]
fn normalization_is_idempotent() {
    for cmd in [
        "ls documents",
        "find ~/downloads -name '*.PDF'",
        "cp $HOME/desktop/a.txt ~/workspace/",
        "find. -type f",
        "du -sh ${HOME}/Documents | sort -h > ~/workspace/sizes.txt",
    ] {
        let once = normalize_command(cmd);
        assert_eq!(normalize_command(&once), once, "{cmd}");
    }
}

#[test]
fn casing_and_tilde_forms_agree() {
    assert_eq!(normalize_command("ls documents"), "ls /home/user/Documents");
    assert_eq!(normalize_command("ls ~/Documents"), "ls /home/user/Documents");
    assert_eq!(normalize_command("ls $HOME/DOCUMENTS"), "ls /home/user/Documents");
}

#[test]
fn quoted_patterns_survive() {
    let cmd = "find . -path '*/documents/*'";
    assert_eq!(normalize_command(cmd), cmd);
}

#[test]
fn blocklist_rejects_without_sanitized_command() {
    for cmd in ["rm -rf /", ":(){ :|:& };:", "mkfs.ext4 /dev/sda1"] {
        let result = validator().validate(cmd);
        assert!(!result.is_safe(), "{cmd}");
        assert_eq!(result.outcome(), ValidationOutcome::Forbidden, "{cmd}");
        assert!(result.sanitized_command().is_none(), "{cmd}");
    }
}

#[test]
fn read_only_commands_are_quietly_safe() {
    for cmd in ["ls Desktop", "find . -name \"*.pdf\""] {
        let result = validator().validate(cmd);
        assert!(result.is_safe(), "{cmd}: {:?}", result.reason());
        assert_eq!(result.outcome(), ValidationOutcome::Safe);
        assert!(result.warnings().is_empty());
    }
}

#[test]
fn writes_into_read_only_mounts_are_boundary_violations() {
    for cmd in [
        "touch ~/Desktop/new.txt",
        "mkdir documents/projects",
        "mv ~/workspace/a.txt ~/Downloads/",
        "echo hi > ~/Documents/note.txt",
        "ls ~/workspace && rm ~/downloads/setup.iso",
    ] {
        let result = validator().validate(cmd);
        assert_eq!(result.outcome(), ValidationOutcome::BlockedByBoundary, "{cmd}");
        assert!(
            matches!(result.rejection(), Some(Rejection::ReadOnlyTarget { .. })),
            "{cmd}"
        );
        assert!(result.reason().unwrap().contains("read-only"));
    }
}

#[test]
fn workspace_writes_pass_with_warnings_for_destructive_commands() {
    let result = validator().validate("rm -r ~/workspace/old");
    assert!(result.is_safe());
    assert_eq!(result.outcome(), ValidationOutcome::SafeWithWarnings);
    assert_eq!(result.sanitized_command(), Some("rm -r /home/user/workspace/old"));

    let result = validator().validate("cp ~/Documents/report.pdf ~/workspace/");
    assert_eq!(result.outcome(), ValidationOutcome::Safe);
}

#[test]
fn system_paths_are_rejected_even_for_reads() {
    let result = validator().validate("cat /etc/shadow");
    assert!(matches!(
        result.rejection(),
        Some(Rejection::ForbiddenPath { .. })
    ));
}

#[test]
fn home_references_in_write_targets_cannot_leave_the_sandbox() {
    for cmd in [
        "echo hi >~/Desktop/a",
        "echo hi >$HOME/../escaped",
        "cp notes.txt \"$HOME/../escaped\"",
        "touch \"/home/user/Downloads\"/x",
    ] {
        let result = validator().validate(cmd);
        assert_eq!(result.outcome(), ValidationOutcome::BlockedByBoundary, "{cmd}");
        assert!(result.sanitized_command().is_none(), "{cmd}");
        assert_eq!(result.warnings().last().cloned(), result.reason(), "{cmd}");
    }
}

#[test]
fn chains_and_delegated_writes_respect_read_only_mounts() {
    for cmd in [
        "cd ~/Desktop && touch planted.txt",
        "find ~ -name x -exec rm {} +",
        "find ~/Documents -delete",
        "ls ~/Downloads | xargs rm",
        "cp -t ~/Desktop ~/workspace/a.txt",
    ] {
        let result = validator().validate(cmd);
        assert_eq!(result.outcome(), ValidationOutcome::BlockedByBoundary, "{cmd}");
    }

    let result = validator().validate("find ~/Desktop -name '*.pdf' | xargs cp -t ~/workspace");
    assert!(result.is_safe(), "{:?}", result.reason());
}

#[test]
fn folders_reached_through_parent_steps_are_recased() {
    assert_eq!(
        normalize_command("ls ~/Desktop/../documents"),
        "ls /home/user/Desktop/../Documents"
    );
}
