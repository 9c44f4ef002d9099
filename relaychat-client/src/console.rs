//! Line-oriented input grammar for the terminal front end.

use std::path::PathBuf;

use crate::command::ClientCommand;

pub const HELP: &str = "\
commands:
  /msg <peer> <text>     send a message
  /file <peer> <path>    send a file
  /save <n> <dest>       copy received file #n to dest (file or directory)
  /who                   list online peers
  /quit                  disconnect and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Command(ClientCommand),
    Save { index: usize, dest: PathBuf },
    Who,
    Help,
    Invalid(String),
}

/// Returns `None` for blank lines.
pub fn parse_line(line: &str) -> Option<ConsoleInput> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (word, rest) = split_word(line);
    let input = match word {
        "/msg" => match split_word(rest) {
            (to, text) if !to.is_empty() && !text.is_empty() => {
                ConsoleInput::Command(ClientCommand::SendText {
                    to: to.to_owned(),
                    text: text.to_owned(),
                })
            }
            _ => ConsoleInput::Invalid("usage: /msg <peer> <text>".to_owned()),
        },
        "/file" => match split_word(rest) {
            (to, path) if !to.is_empty() && !path.is_empty() => {
                ConsoleInput::Command(ClientCommand::SendFile {
                    to: to.to_owned(),
                    path: PathBuf::from(path),
                })
            }
            _ => ConsoleInput::Invalid("usage: /file <peer> <path>".to_owned()),
        },
        "/save" => {
            let (index, dest) = split_word(rest);
            match index.parse::<usize>() {
                Ok(index) if index > 0 && !dest.is_empty() => ConsoleInput::Save {
                    index,
                    dest: PathBuf::from(dest),
                },
                _ => ConsoleInput::Invalid("usage: /save <n> <dest>".to_owned()),
            }
        }
        "/who" => ConsoleInput::Who,
        "/quit" | "/exit" => ConsoleInput::Command(ClientCommand::Shutdown),
        "/help" => ConsoleInput::Help,
        other => ConsoleInput::Invalid(format!("unknown command {other:?}, try /help")),
    };
    Some(input)
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}
