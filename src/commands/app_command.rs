use crate::tasks::WorkflowJob;
use crate::workflow::actions::ActionPayload;
use crate::workflow::conflict::ConflictAction;
use std::str::FromStr;

pub const HELP: &str = "Commands: runs | jobs | conflicts <run> | unresolved <run> | \
internal <run> | external <run> | release <run> | delete-run <run> | \
inspect <run> | check|resolve|manual-resolve|reject <ids..> | \
accept <ids..> [tag=<name>] [comment] | tag <id> <name> [description] | comment <id> <text> | \
conflict <id> merge|rename|new|ignore|delete | conflict <id> annotate [tag=<name>] [comment] | \
help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    Runs,
    Jobs,
    Conflicts {
        run_id: i32,
    },
    Unresolved {
        run_id: i32,
    },
    Inspect {
        run_id: i32,
    },
    /// Queued on the task service.
    Submit(WorkflowJob),
    /// Run inline through the action table.
    Action {
        action: &'static str,
        detection_ids: Vec<i32>,
        payload: ActionPayload,
    },
    Conflict {
        conflict_id: i32,
        action: ConflictAction,
    },
    Help,
    Quit,
    Unknown(String),
}

impl FromStr for AppCommand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(AppCommand::Unknown("".to_string()));
        }

        let usage = |text: &str| Ok(AppCommand::Unknown(format!("usage: {}", text)));

        match parts[0] {
            "runs" => Ok(AppCommand::Runs),
            "jobs" | "tasks" => Ok(AppCommand::Jobs),
            "conflicts" => match parse_id(parts.get(1)) {
                Some(run_id) => Ok(AppCommand::Conflicts { run_id }),
                None => usage("conflicts <run>"),
            },
            "unresolved" => match parse_id(parts.get(1)) {
                Some(run_id) => Ok(AppCommand::Unresolved { run_id }),
                None => usage("unresolved <run>"),
            },
            "inspect" => match parse_id(parts.get(1)) {
                Some(run_id) => Ok(AppCommand::Inspect { run_id }),
                None => usage("inspect <run>"),
            },
            "internal" | "external" | "release" | "delete-run" => {
                let Some(run_id) = parse_id(parts.get(1)) else {
                    return usage(&format!("{} <run>", parts[0]));
                };
                let job = match parts[0] {
                    "internal" => WorkflowJob::InternalCrossMatch { run_id },
                    "external" => WorkflowJob::ExternalCrossMatch { run_id },
                    "release" => WorkflowJob::ReleaseSources { run_id },
                    _ => WorkflowJob::DeleteRun { run_id },
                };
                Ok(AppCommand::Submit(job))
            }
            "check" | "resolve" | "manual-resolve" | "accept" | "reject" => {
                let action = match parts[0] {
                    "check" => "check",
                    "resolve" => "auto_resolve",
                    "manual-resolve" => "manual_resolve",
                    "accept" => "accept",
                    _ => "reject",
                };
                let (detection_ids, rest) = leading_ids(&parts[1..]);
                if detection_ids.is_empty() {
                    return usage(&format!("{} <ids..>", parts[0]));
                }
                let payload = if action == "accept" {
                    let (tag, comment) = annotation(rest);
                    if tag.is_none() && comment.is_none() {
                        ActionPayload::None
                    } else {
                        ActionPayload::Accept { tag, comment }
                    }
                } else if rest.is_empty() {
                    ActionPayload::None
                } else {
                    return usage(&format!("{} <ids..>", parts[0]));
                };
                Ok(AppCommand::Action {
                    action,
                    detection_ids,
                    payload,
                })
            }
            "tag" => match (parse_id(parts.get(1)), parts.get(2)) {
                (Some(id), Some(name)) => {
                    let rest = parts[3..].join(" ");
                    Ok(AppCommand::Action {
                        action: "tag",
                        detection_ids: vec![id],
                        payload: ActionPayload::Tag {
                            name: name.to_string(),
                            description: (!rest.is_empty()).then_some(rest),
                        },
                    })
                }
                _ => usage("tag <id> <name> [description]"),
            },
            "comment" => {
                let text = parts.get(2..).map(|p| p.join(" ")).unwrap_or_default();
                match parse_id(parts.get(1)) {
                    Some(id) if !text.is_empty() => Ok(AppCommand::Action {
                        action: "comment",
                        detection_ids: vec![id],
                        payload: ActionPayload::Comment(text),
                    }),
                    _ => usage("comment <id> <text>"),
                }
            }
            "conflict" => match (parse_id(parts.get(1)), parts.get(2)) {
                (Some(conflict_id), Some(raw)) if raw.eq_ignore_ascii_case("annotate") => {
                    match annotation(&parts[3..]) {
                        (None, None) => usage("conflict <id> annotate [tag=<name>] [comment]"),
                        (tag, comment) => Ok(AppCommand::Conflict {
                            conflict_id,
                            action: ConflictAction::Annotate { tag, comment },
                        }),
                    }
                }
                (Some(conflict_id), Some(raw)) => match ConflictAction::from_str(raw) {
                    Ok(action) => Ok(AppCommand::Conflict {
                        conflict_id,
                        action,
                    }),
                    Err(msg) => Ok(AppCommand::Unknown(msg)),
                },
                _ => usage("conflict <id> merge|rename|new|ignore|delete|annotate"),
            },
            "help" | "h" => Ok(AppCommand::Help),
            "quit" | "q" | "exit" => Ok(AppCommand::Quit),
            _ => Ok(AppCommand::Unknown(format!("unknown command: {}", parts[0]))),
        }
    }
}

fn parse_id(raw: Option<&&str>) -> Option<i32> {
    raw.and_then(|s| s.parse::<i32>().ok())
}

/// Ids may be separated by spaces or commas: `check 4 5,6`.
fn parse_ids(parts: &[&str]) -> Option<Vec<i32>> {
    parts
        .iter()
        .flat_map(|p| p.split(','))
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i32>().ok())
        .collect()
}

/// Splits the id list off the front; whatever does not parse as ids is returned.
fn leading_ids<'a, 'b>(parts: &'a [&'b str]) -> (Vec<i32>, &'a [&'b str]) {
    let mut ids = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        match parse_ids(std::slice::from_ref(part)) {
            Some(more) => ids.extend(more),
            None => return (ids, &parts[i..]),
        }
    }
    (ids, &[])
}

/// `tag=<name>` anywhere in the words, the remaining words form the comment.
fn annotation(parts: &[&str]) -> (Option<String>, Option<String>) {
    let mut tag = None;
    let mut words = Vec::new();
    for part in parts {
        match part.strip_prefix("tag=") {
            Some(name) if !name.is_empty() => tag = Some(name.to_string()),
            _ => words.push(*part),
        }
    }
    let comment = words.join(" ");
    (tag, (!comment.is_empty()).then_some(comment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> AppCommand {
        AppCommand::from_str(s).unwrap()
    }

    #[test]
    fn workflow_commands_become_jobs() {
        assert_eq!(
            parse("internal 3"),
            AppCommand::Submit(WorkflowJob::InternalCrossMatch { run_id: 3 })
        );
        assert_eq!(
            parse("delete-run 9"),
            AppCommand::Submit(WorkflowJob::DeleteRun { run_id: 9 })
        );
        assert!(matches!(parse("release"), AppCommand::Unknown(m) if m.contains("release <run>")));
        assert_eq!(parse("inspect 3"), AppCommand::Inspect { run_id: 3 });
        assert!(matches!(parse("inspect x"), AppCommand::Unknown(m) if m.contains("inspect <run>")));
    }

    #[test]
    fn detection_actions_take_id_lists() {
        assert_eq!(
            parse("resolve 4 5,6"),
            AppCommand::Action {
                action: "auto_resolve",
                detection_ids: vec![4, 5, 6],
                payload: ActionPayload::None,
            }
        );
        assert!(matches!(parse("reject 4 x"), AppCommand::Unknown(_)));
        assert!(matches!(parse("check"), AppCommand::Unknown(_)));
    }

    #[test]
    fn accept_carries_optional_tag_and_comment() {
        assert_eq!(
            parse("accept 4,5 tag=Good clean spectrum"),
            AppCommand::Action {
                action: "accept",
                detection_ids: vec![4, 5],
                payload: ActionPayload::Accept {
                    tag: Some("Good".into()),
                    comment: Some("clean spectrum".into()),
                },
            }
        );
        assert_eq!(
            parse("accept 4 edge of cube"),
            AppCommand::Action {
                action: "accept",
                detection_ids: vec![4],
                payload: ActionPayload::Accept {
                    tag: None,
                    comment: Some("edge of cube".into()),
                },
            }
        );
        assert_eq!(
            parse("accept 4 6"),
            AppCommand::Action {
                action: "accept",
                detection_ids: vec![4, 6],
                payload: ActionPayload::None,
            }
        );
        assert!(matches!(parse("accept tag=Good"), AppCommand::Unknown(_)));
    }

    #[test]
    fn tag_and_comment_keep_free_text() {
        assert_eq!(
            parse("tag 7 Outlier bright continuum"),
            AppCommand::Action {
                action: "tag",
                detection_ids: vec![7],
                payload: ActionPayload::Tag {
                    name: "Outlier".into(),
                    description: Some("bright continuum".into()),
                },
            }
        );
        assert_eq!(
            parse("comment 7 looks like RFI"),
            AppCommand::Action {
                action: "comment",
                detection_ids: vec![7],
                payload: ActionPayload::Comment("looks like RFI".into()),
            }
        );
        assert!(matches!(parse("comment 7"), AppCommand::Unknown(_)));
    }

    #[test]
    fn conflict_actions_and_fallbacks() {
        assert_eq!(
            parse("conflict 2 replace"),
            AppCommand::Conflict {
                conflict_id: 2,
                action: ConflictAction::Merge,
            }
        );
        assert!(matches!(parse("conflict 2 explode"), AppCommand::Unknown(m) if m.contains("explode")));
        assert_eq!(
            parse("conflict 2 annotate tag=Review same galaxy?"),
            AppCommand::Conflict {
                conflict_id: 2,
                action: ConflictAction::Annotate {
                    tag: Some("Review".into()),
                    comment: Some("same galaxy?".into()),
                },
            }
        );
        assert_eq!(
            parse("conflict 3 annotate tag=Review"),
            AppCommand::Conflict {
                conflict_id: 3,
                action: ConflictAction::Annotate {
                    tag: Some("Review".into()),
                    comment: None,
                },
            }
        );
        assert!(matches!(parse("conflict 2 annotate"), AppCommand::Unknown(m) if m.contains("annotate")));
        assert_eq!(parse("q"), AppCommand::Quit);
        assert!(matches!(parse("frobnicate"), AppCommand::Unknown(_)));
    }
}
