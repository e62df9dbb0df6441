use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use typed_bytesize::ByteSizeIec;

/// One parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Format { size: u32 },
    Ls { path: Option<String> },
    Cat { path: String },
    Cd { path: String },
    Pwd,
    Mkdir { path: String },
    Rmdir { path: String },
    Rm { path: String },
    Cp { src: String, dst: String },
    Mv { src: String, dst: String },
    Incp { host: PathBuf, path: String },
    Outcp { path: String, host: PathBuf },
    Xcp { first: String, second: String, dst: String },
    Info { path: String },
    Short { path: String },
    Load { script: PathBuf },
    Exit,
}

impl Command {
    /// Whether the command changes the image.
    pub fn mutates(&self) -> bool {
        matches!(
            self,
            Self::Format { .. }
                | Self::Mkdir { .. }
                | Self::Rmdir { .. }
                | Self::Rm { .. }
                | Self::Cp { .. }
                | Self::Mv { .. }
                | Self::Incp { .. }
                | Self::Xcp { .. }
                | Self::Short { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Unknown(String),
    ArgCount {
        command: String,
        min: usize,
        max: usize,
        got: usize,
    },
    BadSize(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(name) => write!(f, "unknown command `{name}`"),
            Self::ArgCount {
                command,
                min,
                max,
                got,
            } if min == max => write!(f, "`{command}` takes {min} argument(s), got {got}"),
            Self::ArgCount {
                command,
                min,
                max,
                got,
            } => write!(f, "`{command}` takes {min} to {max} arguments, got {got}"),
            Self::BadSize(arg) => write!(f, "bad size `{arg}`, expected <n>KB or <n>MB"),
        }
    }
}

impl std::error::Error for ParseError {}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();
        let arity = |min: usize, max: usize| {
            if (min..=max).contains(&args.len()) {
                Ok(())
            } else {
                Err(ParseError::ArgCount {
                    command: name.to_owned(),
                    min,
                    max,
                    got: args.len(),
                })
            }
        };
        let arg = |i: usize| args[i].to_owned();

        let command = match name {
            "format" => {
                arity(1, 1)?;
                Self::Format {
                    size: parse_size(args[0])?,
                }
            }
            "ls" => {
                arity(0, 1)?;
                Self::Ls {
                    path: args.first().map(|&p| p.to_owned()),
                }
            }
            "cat" => {
                arity(1, 1)?;
                Self::Cat { path: arg(0) }
            }
            "cd" => {
                arity(1, 1)?;
                Self::Cd { path: arg(0) }
            }
            "pwd" => {
                arity(0, 0)?;
                Self::Pwd
            }
            "mkdir" => {
                arity(1, 1)?;
                Self::Mkdir { path: arg(0) }
            }
            "rmdir" => {
                arity(1, 1)?;
                Self::Rmdir { path: arg(0) }
            }
            "rm" => {
                arity(1, 1)?;
                Self::Rm { path: arg(0) }
            }
            "cp" => {
                arity(2, 2)?;
                Self::Cp {
                    src: arg(0),
                    dst: arg(1),
                }
            }
            "mv" => {
                arity(2, 2)?;
                Self::Mv {
                    src: arg(0),
                    dst: arg(1),
                }
            }
            "incp" => {
                arity(2, 2)?;
                Self::Incp {
                    host: PathBuf::from(args[0]),
                    path: arg(1),
                }
            }
            "outcp" => {
                arity(2, 2)?;
                Self::Outcp {
                    path: arg(0),
                    host: PathBuf::from(args[1]),
                }
            }
            "xcp" => {
                arity(3, 3)?;
                Self::Xcp {
                    first: arg(0),
                    second: arg(1),
                    dst: arg(2),
                }
            }
            "info" => {
                arity(1, 1)?;
                Self::Info { path: arg(0) }
            }
            "short" => {
                arity(1, 1)?;
                Self::Short { path: arg(0) }
            }
            "load" => {
                arity(1, 1)?;
                Self::Load {
                    script: PathBuf::from(args[0]),
                }
            }
            "exit" | "quit" | "close" => {
                arity(0, 0)?;
                Self::Exit
            }
            _ => return Err(ParseError::Unknown(name.to_owned())),
        };
        Ok(command)
    }
}

/// `<n>KB` or `<n>MB`, in binary units.
fn parse_size(arg: &str) -> Result<u32, ParseError> {
    let bad = || ParseError::BadSize(arg.to_owned());
    let count = |digits: &str| digits.parse::<u32>().map(u64::from).map_err(|_| bad());

    let bytes = if let Some(digits) = arg.strip_suffix("KB") {
        ByteSizeIec::kib(count(digits)?).0
    } else if let Some(digits) = arg.strip_suffix("MB") {
        ByteSizeIec::mib(count(digits)?).0
    } else {
        return Err(bad());
    };
    u32::try_from(bytes).map_err(|_| bad())
}
