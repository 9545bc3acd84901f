//! CLI (Command Line Interface) mode
//!
//! Interactive REPL over the chat memory of one user. Plain input goes
//! through an offline echo agent so every turn is stored the same way the
//! bot stores it: a user/agent pair in one transaction.

use cm_core::ChatService;
use nu_ansi_term::{Color, Style};
use reedline::{
    ColumnarMenu, Completer, DefaultHinter, Emacs, KeyCode, KeyModifiers, Keybindings,
    MenuBuilder, Prompt, Reedline, ReedlineEvent, ReedlineMenu, Signal, Suggestion,
};
use std::borrow::Cow;
use tracing::info;

/// Available commands for autocomplete display
const COMMANDS: &[(&str, &str)] = &[
    ("/help", "Show help"),
    ("/exit", "Quit"),
    ("/quit", "Quit"),
    ("/new_session", "Clear stored history and start over"),
    ("/history", "Show stored history"),
    ("/count", "Show stored message count"),
];

/// Command completer for reedline
#[derive(Clone)]
pub struct CommandCompleter {
    commands: Vec<(&'static str, &'static str)>,
}

impl CommandCompleter {
    pub fn new() -> Self {
        Self {
            commands: COMMANDS.to_vec(),
        }
    }
}

impl Default for CommandCompleter {
    fn default() -> Self {
        Self::new()
    }
}

impl Completer for CommandCompleter {
    fn complete(&mut self, line: &str, pos: usize) -> Vec<Suggestion> {
        if !line.starts_with('/') {
            return Vec::new();
        }

        self.commands
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(line))
            .map(|(cmd, desc)| Suggestion {
                value: cmd.to_string(),
                description: Some(desc.to_string()),
                extra: None,
                span: reedline::Span::new(0, pos),
                append_whitespace: true,
                style: None,
            })
            .collect()
    }
}

/// Prompt showing the active user
struct UserPrompt {
    user_id: String,
    style: Style,
}

impl UserPrompt {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            style: Color::Cyan.bold(),
        }
    }
}

impl Prompt for UserPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Owned(self.style.paint(format!("{}> ", self.user_id)).to_string())
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_history_search_indicator(
        &self,
        _history_search: reedline::PromptHistorySearch,
    ) -> Cow<'_, str> {
        Cow::Borrowed("")
    }
}

/// REPL slash command
#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    Exit,
    NewSession,
    History,
    Count,
    Help,
    Unknown(String),
}

/// `None` when the input is a chat message rather than a command
fn parse_command(input: &str) -> Option<CliCommand> {
    if !input.starts_with('/') {
        return None;
    }

    let command = match input.to_lowercase().as_str() {
        "/exit" | "/quit" | "/q" => CliCommand::Exit,
        "/new_session" | "/new" => CliCommand::NewSession,
        "/history" => CliCommand::History,
        "/count" => CliCommand::Count,
        "/help" | "/?" => CliCommand::Help,
        _ => CliCommand::Unknown(input.to_string()),
    };
    Some(command)
}

/// Stand-in agent used when no model is attached
async fn echo_agent(question: String, history: Vec<String>) -> cm_core::Result<String> {
    Ok(format!(
        "You said \"{}\". I remember {} earlier messages.",
        question,
        history.len()
    ))
}

/// Run CLI interactive mode for `user_id`
pub async fn run_cli(service: &ChatService, user_id: &str) -> anyhow::Result<()> {
    info!("Starting CLI mode for user {}", user_id);
    print_welcome(user_id);

    let mut keybindings = default_keybindings();

    // Trigger completion on '/' key
    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Char('/'),
        ReedlineEvent::Edit(vec![reedline::EditCommand::Complete]),
    );

    let menu = Box::new(
        ColumnarMenu::default()
            .with_name("command_menu")
            .with_columns(1)
            .with_column_width(Some(40))
            .with_only_buffer_difference(false),
    );

    let hinter = DefaultHinter::default().with_style(Style::new().dimmed());

    let mut line_editor = Reedline::create()
        .with_completer(Box::new(CommandCompleter::new()))
        .with_menu(ReedlineMenu::EngineCompleter(menu))
        .with_hinter(Box::new(hinter))
        .with_edit_mode(Box::new(Emacs::new(keybindings)));

    let prompt = UserPrompt::new(user_id);

    loop {
        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(line)) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                match parse_command(input) {
                    Some(CliCommand::Exit) => break,
                    Some(command) => {
                        if let Err(e) = handle_command(service, user_id, command).await {
                            eprintln!("\nError: {}\n", e);
                        }
                    }
                    None => match service.invoke(user_id, input, echo_agent).await {
                        Ok(response) => println!("\n{}\n", response),
                        Err(e) => eprintln!("\nError: {}\n", e),
                    },
                }
            }
            Ok(Signal::CtrlC) => {
                println!("^C");
                continue;
            }
            Ok(Signal::CtrlD) => break,
            Err(err) => {
                eprintln!("\nError: {}\n", err);
                break;
            }
        }
    }

    println!("\nBye!\n");
    Ok(())
}

/// Default keybindings for reedline
fn default_keybindings() -> Keybindings {
    let mut keybindings = Keybindings::new();
    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Tab,
        ReedlineEvent::Edit(vec![reedline::EditCommand::Complete]),
    );
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Enter, ReedlineEvent::Submit);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Esc, ReedlineEvent::Esc);
    keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('c'), ReedlineEvent::CtrlC);
    keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('d'), ReedlineEvent::CtrlD);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Up, ReedlineEvent::Up);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Down, ReedlineEvent::Down);
    keybindings
}

async fn handle_command(
    service: &ChatService,
    user_id: &str,
    command: CliCommand,
) -> cm_core::Result<()> {
    match command {
        CliCommand::NewSession => {
            service.new_session(user_id).await?;
            println!("\nNew session started. Chat history cleared.\n");
        }
        CliCommand::History => {
            let history = service.history(user_id).await?;
            print_history(&history);
        }
        CliCommand::Count => {
            let count = service.message_count(user_id).await?;
            println!("\n{} stored messages\n", count);
        }
        CliCommand::Help => print_help(),
        CliCommand::Unknown(input) => {
            println!("\nUnknown command: {} (try /help)\n", input);
        }
        CliCommand::Exit => {}
    }
    Ok(())
}

fn print_welcome(user_id: &str) {
    println!();
    println!("chat-memory CLI - user {}", user_id);
    println!("Type a message and press Enter. Commands: /help, /new_session, /history, /exit");
    println!();
}

/// Print help message
fn print_help() {
    println!();
    println!("Commands:");
    for (cmd, desc) in COMMANDS {
        println!("  {} - {}", cmd, desc);
    }
    println!();
}

/// Print stored history, most recent first
fn print_history(history: &[String]) {
    println!();
    if history.is_empty() {
        println!("(no stored messages)");
    }
    for (i, line) in history.iter().enumerate() {
        println!("{:>2}. {}", i + 1, line);
    }
    println!();
}
