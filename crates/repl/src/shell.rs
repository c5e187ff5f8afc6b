//! The interactive shell.
//!
//! One VM lives for the whole session, so globals, interned strings,
//! and declared natives persist from line to line. Top-level expression
//! results come back through the compiler's print latch as `> <value>`
//! lines; errors are reported and the shell simply prompts again.

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crispy_runtime::{Vm, VmOptions};

const PROMPT: &str = ">>> ";
const HISTORY_FILE: &str = ".crispy_history";

pub fn run(options: VmOptions) -> i32 {
    let mut vm = Vm::with_options(true, options);

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Could not start the shell: {err}");
            return -1;
        }
    };

    let history = dirs::home_dir().map(|home| home.join(HISTORY_FILE));
    if let Some(path) = &history {
        let _ = editor.load_history(path);
    }

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = editor.add_history_entry(&line);
                }
                // Errors were already reported; the shell just keeps going.
                let _ = vm.interpret_interactive(line.as_bytes());
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{err}");
                return -1;
            }
        }
    }

    if let Some(path) = &history {
        let _ = editor.save_history(path);
    }
    eprintln!("Bye.");
    0
}
