use std::path::PathBuf;

use cloudrender_core::OperationKind;
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  login <user> <password>          log in and fetch the job list
  jobs                             refresh the job list
  list                             show the cached job list
  select <id>                      select a job
  create <name> <file> [project]   create a job and upload the file
  render                           pay for and start rendering the selected job
  download                         download the selected job's result
  folder <path>                    set the download folder
  status                           show login state and progress
  cancel <kind>                    cancel login|fetch-jobs|create-job|render|download
  help                             show this text
  quit                             exit
Arguments containing spaces can be wrapped in double quotes.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { username: String, password: String },
    FetchJobs,
    List,
    Select(String),
    Create {
        name: String,
        file: PathBuf,
        project: Option<String>,
    },
    Render,
    Download,
    Folder(PathBuf),
    Status,
    Cancel(OperationKind),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command `{0}`, try `help`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown operation `{0}`")]
    UnknownKind(String),
    #[error("unterminated quote")]
    UnterminatedQuote,
}

/// Parses one input line. Blank lines give `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let words = split_words(line)?;
    let Some((verb, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match (verb.as_str(), args) {
        ("login", [username, password]) => Command::Login {
            username: username.clone(),
            password: password.clone(),
        },
        ("login", _) => return Err(CommandError::Usage("login <user> <password>")),
        ("jobs", []) => Command::FetchJobs,
        ("list", []) => Command::List,
        ("select", [id]) => Command::Select(id.clone()),
        ("select", _) => return Err(CommandError::Usage("select <id>")),
        ("create", [name, file]) => Command::Create {
            name: name.clone(),
            file: PathBuf::from(file),
            project: None,
        },
        ("create", [name, file, project]) => Command::Create {
            name: name.clone(),
            file: PathBuf::from(file),
            project: Some(project.clone()),
        },
        ("create", _) => return Err(CommandError::Usage("create <name> <file> [project]")),
        ("render", []) => Command::Render,
        ("download", []) => Command::Download,
        ("folder", [path]) => Command::Folder(PathBuf::from(path)),
        ("folder", _) => return Err(CommandError::Usage("folder <path>")),
        ("status", []) => Command::Status,
        ("cancel", [kind]) => Command::Cancel(
            OperationKind::from_label(kind)
                .ok_or_else(|| CommandError::UnknownKind(kind.clone()))?,
        ),
        ("cancel", _) => return Err(CommandError::Usage("cancel <kind>")),
        ("help", _) => Command::Help,
        ("quit" | "exit", []) => Command::Quit,
        ("jobs" | "list" | "render" | "download" | "status" | "quit" | "exit", _) => {
            return Err(CommandError::Usage("the command takes no arguments"))
        }
        (other, _) => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn split_words(line: &str) -> Result<Vec<String>, CommandError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            ch if ch.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            ch => {
                current.push(ch);
                in_word = true;
            }
        }
    }
    if quoted {
        return Err(CommandError::UnterminatedQuote);
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(parse("").unwrap(), None);
    }

    #[test]
    fn parses_login() {
        assert_eq!(
            parse("login ada s3cret").unwrap(),
            Some(Command::Login {
                username: "ada".to_string(),
                password: "s3cret".to_string(),
            })
        );
        assert_eq!(
            parse("login ada").unwrap_err(),
            CommandError::Usage("login <user> <password>")
        );
    }

    #[test]
    fn quoted_arguments_keep_their_spaces() {
        assert_eq!(
            parse(r#"create "Night shot" "/tmp/my scene.blend" studio"#).unwrap(),
            Some(Command::Create {
                name: "Night shot".to_string(),
                file: PathBuf::from("/tmp/my scene.blend"),
                project: Some("studio".to_string()),
            })
        );
        assert_eq!(
            parse(r#"folder """#).unwrap(),
            Some(Command::Folder(PathBuf::new()))
        );
    }

    #[test]
    fn create_without_project() {
        assert_eq!(
            parse("create shot scene.blend").unwrap(),
            Some(Command::Create {
                name: "shot".to_string(),
                file: PathBuf::from("scene.blend"),
                project: None,
            })
        );
    }

    #[test]
    fn cancel_takes_an_operation_label() {
        assert_eq!(
            parse("cancel fetch-jobs").unwrap(),
            Some(Command::Cancel(OperationKind::FetchJobs))
        );
        assert_eq!(
            parse("cancel everything").unwrap_err(),
            CommandError::UnknownKind("everything".to_string())
        );
    }

    #[test]
    fn simple_verbs() {
        assert_eq!(parse("jobs").unwrap(), Some(Command::FetchJobs));
        assert_eq!(parse(" list ").unwrap(), Some(Command::List));
        assert_eq!(parse("select j2").unwrap(), Some(Command::Select("j2".to_string())));
        assert_eq!(parse("render").unwrap(), Some(Command::Render));
        assert_eq!(parse("download").unwrap(), Some(Command::Download));
        assert_eq!(parse("status").unwrap(), Some(Command::Status));
        assert_eq!(parse("help me").unwrap(), Some(Command::Help));
        assert_eq!(parse("exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            parse("fly away").unwrap_err(),
            CommandError::Unknown("fly".to_string())
        );
        assert!(matches!(parse("render now"), Err(CommandError::Usage(_))));
        assert_eq!(
            parse("select \"j1").unwrap_err(),
            CommandError::UnterminatedQuote
        );
    }
}
