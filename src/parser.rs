use std::env;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// A command line split into words.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandLine {
    pub argv: Vec<String>,
    /// A trailing `&` word was given. It is not part of `argv`.
    pub background: bool,
}

impl CommandLine {
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}

/// Splits a line on spaces. Text between single quotes is one word, spaces
/// included. An unterminated quote runs to the end of the line.
pub fn parse_line(line: &str) -> CommandLine {
    let mut argv = Vec::new();
    let mut rest = line.trim_end_matches(['\n', '\r']);

    loop {
        rest = rest.trim_start_matches([' ', '\t']);
        if rest.is_empty() {
            break;
        }
        let (word, tail) = match rest.strip_prefix('\'') {
            Some(quoted) => quoted.split_once('\'').unwrap_or((quoted, "")),
            None => rest.split_once([' ', '\t']).unwrap_or((rest, "")),
        };
        argv.push(word.to_string());
        rest = tail;
    }

    let background = argv.last().is_some_and(|w| w == "&");
    if background {
        argv.pop();
    }
    CommandLine { argv, background }
}

/// Looks the program word up in `PATH`.
///
/// Words containing a `/` are used as given. A word not found on `PATH` is
/// also returned as given, so that exec fails in the child and reports it.
pub fn resolve_path(program: &str) -> String {
    if program.contains('/') {
        return program.to_string();
    }
    let Ok(path) = env::var("PATH") else {
        return program.to_string();
    };
    path.split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| format!("{dir}/{program}"))
        .find(|candidate| is_executable(Path::new(candidate)))
        .unwrap_or_else(|| program.to_string())
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
