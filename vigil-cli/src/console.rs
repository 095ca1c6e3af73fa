// Vigil interactive console
// Reads host control method names from stdin and forwards them to the pipeline

use anyhow::Result;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;
use tokio::task::JoinHandle;
use vigil::{ControlCommand, PipelineController, PipelineState};

enum CommandResult {
    Continue,
    Exit,
    Success(String),
    Error(String),
    Output(String),
}

pub struct InteractiveConsole {
    controller: Arc<PipelineController>,
    printer: Option<JoinHandle<u64>>,
}

impl InteractiveConsole {
    pub fn new(controller: Arc<PipelineController>) -> Self {
        Self {
            controller,
            printer: None,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        self.print_help();

        let stdin = io::stdin();
        let mut stdin = BufReader::new(stdin.lock());

        loop {
            print!("vigil[{:?}]> ", self.controller.state());
            io::stdout().flush()?;

            let mut line = String::new();
            if stdin.read_line(&mut line)? == 0 {
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match self.handle_command(line).await {
                CommandResult::Continue => continue,
                CommandResult::Exit => break,
                CommandResult::Success(msg) => println!("ok: {}", msg),
                CommandResult::Error(msg) => println!("error: {}", msg),
                CommandResult::Output(output) => println!("{}", output),
            }
        }

        if let Some(printer) = self.printer.take() {
            printer.abort();
        }
        Ok(())
    }

    fn print_help(&self) {
        println!("Commands:");
        println!("  initialize        - Allocate the analysis lane");
        println!("  startDetection    - Bind the camera and start detecting");
        println!("  stopDetection     - Unbind the camera and end the event stream");
        println!("  stats             - Show pipeline counters");
        println!("  help              - Show this help message");
        println!("  quit, exit        - Leave the console");
        println!();
    }

    async fn handle_command(&mut self, line: &str) -> CommandResult {
        match line {
            "quit" | "exit" | "q" => return CommandResult::Exit,
            "help" | "?" => {
                self.print_help();
                return CommandResult::Continue;
            }
            "stats" => {
                return match serde_json::to_string_pretty(&self.controller.stats()) {
                    Ok(json) => CommandResult::Output(json),
                    Err(e) => CommandResult::Error(e.to_string()),
                };
            }
            _ => {}
        }

        let command = match ControlCommand::from_method(line) {
            Ok(command) => command,
            Err(e) => return CommandResult::Error(e.to_string()),
        };

        // A stop ends the event stream, so every start needs a fresh one
        if command == ControlCommand::Start && !self.printer_running() {
            self.printer = Some(crate::spawn_printer(self.controller.open_stream()));
        }

        match self.controller.dispatch(command).await {
            Ok(()) => CommandResult::Success(format!(
                "{} -> {:?}",
                command,
                self.controller.state()
            )),
            Err(e) => {
                if self.controller.state() != PipelineState::Running {
                    if let Some(printer) = self.printer.take() {
                        printer.abort();
                    }
                }
                CommandResult::Error(e.to_string())
            }
        }
    }

    fn printer_running(&self) -> bool {
        self.printer
            .as_ref()
            .map_or(false, |printer| !printer.is_finished())
    }
}
