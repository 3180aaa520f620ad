//! Line commands accepted by the namespace server.

use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Cd(String),
    Mkdir(String),
    /// `write <name> <data...>`; the data is the rest of the line, with words
    /// joined by single spaces.
    Write { name: String, data: String },
    Read(String),
    Rm(String),
    Pwd,
    Tree,
    Ls(Option<String>),
    Stat(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let cmd = words.next().ok_or(CommandError::Empty)?;
        let mut arg = |usage: &'static str| {
            words
                .next()
                .map(str::to_string)
                .ok_or(CommandError::Usage(usage))
        };

        let parsed = match cmd {
            "cd" => Command::Cd(arg("cd <path>")?),
            "mkdir" => Command::Mkdir(arg("mkdir <name>")?),
            "write" => {
                let name = arg("write <name> <data...>")?;
                let data = words.collect::<Vec<_>>().join(" ");
                Command::Write { name, data }
            }
            "read" => Command::Read(arg("read <path>")?),
            "rm" => Command::Rm(arg("rm <path>")?),
            "pwd" => Command::Pwd,
            "tree" => Command::Tree,
            "ls" => Command::Ls(words.next().map(str::to_string)),
            "stat" => Command::Stat(arg("stat <path>")?),
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("cd a/b".parse::<Command>(), Ok(Command::Cd("a/b".into())));
        assert_eq!("  pwd ".parse::<Command>(), Ok(Command::Pwd));
        assert_eq!("ls".parse::<Command>(), Ok(Command::Ls(None)));
        assert_eq!("ls /a".parse::<Command>(), Ok(Command::Ls(Some("/a".into()))));
        assert_eq!(
            "write notes.txt hello   brave world".parse::<Command>(),
            Ok(Command::Write {
                name: "notes.txt".into(),
                data: "hello brave world".into()
            })
        );
        assert_eq!(
            "write empty".parse::<Command>(),
            Ok(Command::Write {
                name: "empty".into(),
                data: String::new()
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!("cd".parse::<Command>(), Err(CommandError::Usage("cd <path>")));
        assert_eq!(
            "format disk".parse::<Command>(),
            Err(CommandError::Unknown("format".into()))
        );
    }
}
