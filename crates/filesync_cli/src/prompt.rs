//! Terminal prompt for local-only files.

use filesync_engine::{LocalOnlyChoice, LocalOnlyResolver};
use std::io::{self, BufRead, StdinLock, Stdout, Write};
use tracing::warn;

/// Asks on the terminal what to do with each local-only file.
pub struct TerminalResolver<R, W> {
    input: R,
    output: W,
}

impl TerminalResolver<StdinLock<'static>, Stdout> {
    /// Prompts on stdout and reads answers from stdin.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalResolver<R, W> {
    /// Creates a resolver over arbitrary streams.
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, path: &str) -> io::Result<Option<LocalOnlyChoice>> {
        loop {
            write!(
                self.output,
                "'{}' exists only locally. [p]ush, push [a]ll, [d]elete, delete a[l]l? ",
                path
            )?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            if let Some(choice) = parse_choice(&line) {
                return Ok(Some(choice));
            }
        }
    }
}

fn parse_choice(answer: &str) -> Option<LocalOnlyChoice> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "p" | "push" => Some(LocalOnlyChoice::PushOne),
        "a" | "push all" => Some(LocalOnlyChoice::PushAll),
        "d" | "delete" => Some(LocalOnlyChoice::DeleteOne),
        "l" | "delete all" => Some(LocalOnlyChoice::DeleteAll),
        _ => None,
    }
}

impl<R: BufRead, W: Write> LocalOnlyResolver for TerminalResolver<R, W> {
    fn resolve(&mut self, path: &str) -> LocalOnlyChoice {
        match self.ask(path) {
            Ok(Some(choice)) => choice,
            Ok(None) => {
                warn!(path, "no answer on input, pushing");
                LocalOnlyChoice::PushOne
            }
            Err(e) => {
                warn!(path, error = %e, "prompt failed, pushing");
                LocalOnlyChoice::PushOne
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn resolver(input: &str) -> TerminalResolver<Cursor<Vec<u8>>, Vec<u8>> {
        TerminalResolver::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn answers_map_to_choices() {
        let mut r = resolver("p\nA\n d \nl\n");
        assert_eq!(r.resolve("x"), LocalOnlyChoice::PushOne);
        assert_eq!(r.resolve("x"), LocalOnlyChoice::PushAll);
        assert_eq!(r.resolve("x"), LocalOnlyChoice::DeleteOne);
        assert_eq!(r.resolve("x"), LocalOnlyChoice::DeleteAll);
    }

    #[test]
    fn reprompts_on_unknown_answer() {
        let mut r = resolver("what\n\nd\n");
        assert_eq!(r.resolve("notes/a.txt"), LocalOnlyChoice::DeleteOne);
        let shown = String::from_utf8(r.output).unwrap();
        assert_eq!(shown.matches("notes/a.txt").count(), 3);
    }

    #[test]
    fn end_of_input_pushes() {
        let mut r = resolver("");
        assert_eq!(r.resolve("x"), LocalOnlyChoice::PushOne);
    }
}
