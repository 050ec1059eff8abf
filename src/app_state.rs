use crate::commands::AppCommand;
use crate::storage::entity::{detection, external_conflict, task};
use crate::storage::repository::{RunSummary, TaskStats};
use crossterm::event::KeyCode;
use ratatui::widgets::ListState;
use std::str::FromStr;
use tokio::sync::mpsc;

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum ViewMode {
    Runs,
    Jobs,
    Conflicts,
    Unresolved,
    Inspect,
}

impl ViewMode {
    pub const MENU: [ViewMode; 5] = [
        ViewMode::Runs,
        ViewMode::Jobs,
        ViewMode::Conflicts,
        ViewMode::Unresolved,
        ViewMode::Inspect,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            ViewMode::Runs => "Runs",
            ViewMode::Jobs => "Jobs",
            ViewMode::Conflicts => "Conflicts",
            ViewMode::Unresolved => "Unresolved",
            ViewMode::Inspect => "Inspect",
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub enum InputMode {
    Normal,
    Command,
}

#[derive(PartialEq, Debug, Clone)]
pub enum FocusArea {
    Menu,
    MainView,
}

#[derive(Debug)]
pub enum AppEvent {
    Log(String),
    Message(String),
    Error(String),
    /// A task finished; listings should be reloaded.
    TasksChanged,
    Runs(Vec<RunSummary>),
    Jobs(Vec<task::Model>, TaskStats),
    Conflicts(i32, Vec<external_conflict::Model>),
    Unresolved(i32, Vec<detection::Model>),
    /// Detections of a run waiting for accept or reject.
    Inspect(i32, Vec<detection::Model>),
}

const COMMANDS: &[&str] = &[
    "runs",
    "jobs",
    "conflicts",
    "unresolved",
    "inspect",
    "internal",
    "external",
    "release",
    "delete-run",
    "check",
    "resolve",
    "manual-resolve",
    "accept",
    "reject",
    "tag",
    "comment",
    "conflict",
    "help",
    "quit",
];

const CONFLICT_ACTIONS: &[&str] = &["merge", "rename", "new", "ignore", "delete", "annotate"];

pub struct App {
    pub view_mode: ViewMode,
    pub input_mode: InputMode,
    pub focus_area: FocusArea,
    pub menu_selected_index: usize,
    pub runs: Vec<RunSummary>,
    pub jobs: Vec<task::Model>,
    pub task_stats: TaskStats,
    pub conflicts: Vec<external_conflict::Model>,
    pub unresolved: Vec<detection::Model>,
    pub inspection: Vec<detection::Model>,
    /// Run whose conflicts, unresolved or pending detections are on screen.
    pub current_run: Option<i32>,
    pub selected_index: usize,
    pub list_state: ListState,
    pub command_input: String,
    pub command_cursor: usize,
    pub command_history: Vec<String>,
    pub command_history_index: Option<usize>,
    pub log_messages: Vec<String>,
    pub cmd_tx: mpsc::UnboundedSender<AppCommand>,
    pub evt_rx: Option<mpsc::UnboundedReceiver<AppEvent>>,
}

impl App {
    pub fn new(
        startup_info: Vec<String>,
        cmd_tx: mpsc::UnboundedSender<AppCommand>,
        evt_rx: mpsc::UnboundedReceiver<AppEvent>,
    ) -> App {
        let mut log_messages = vec!["Curator started".to_string()];
        log_messages.extend(startup_info);

        App {
            view_mode: ViewMode::Runs,
            input_mode: InputMode::Normal,
            focus_area: FocusArea::Menu,
            menu_selected_index: 0,
            runs: Vec::new(),
            jobs: Vec::new(),
            task_stats: TaskStats::default(),
            conflicts: Vec::new(),
            unresolved: Vec::new(),
            inspection: Vec::new(),
            current_run: None,
            selected_index: 0,
            list_state: {
                let mut s = ListState::default();
                s.select(Some(0));
                s
            },
            command_input: String::new(),
            command_cursor: 0,
            command_history: Vec::new(),
            command_history_index: None,
            log_messages,
            cmd_tx,
            evt_rx: Some(evt_rx),
        }
    }

    pub fn add_log(&mut self, msg: String) {
        self.log_messages.push(msg);
    }

    pub fn apply_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Log(msg) | AppEvent::Message(msg) | AppEvent::Error(msg) => self.add_log(msg),
            AppEvent::TasksChanged => {
                let _ = self.cmd_tx.send(AppCommand::Jobs);
                let _ = self.cmd_tx.send(AppCommand::Runs);
                self.reload_run_view();
            }
            AppEvent::Runs(runs) => self.runs = runs,
            AppEvent::Jobs(jobs, stats) => {
                self.jobs = jobs;
                self.task_stats = stats;
            }
            AppEvent::Conflicts(run_id, rows) => {
                self.current_run = Some(run_id);
                self.conflicts = rows;
                if self.view_mode != ViewMode::Conflicts {
                    self.switch_view(ViewMode::Conflicts);
                }
            }
            AppEvent::Unresolved(run_id, rows) => {
                self.current_run = Some(run_id);
                self.unresolved = rows;
                if self.view_mode != ViewMode::Unresolved {
                    self.switch_view(ViewMode::Unresolved);
                }
            }
            AppEvent::Inspect(run_id, rows) => {
                self.current_run = Some(run_id);
                self.inspection = rows;
                if self.view_mode != ViewMode::Inspect {
                    self.switch_view(ViewMode::Inspect);
                }
            }
        }
        self.clamp_selection();
    }

    /// Number of rows in the current list view.
    pub fn row_count(&self) -> usize {
        match self.view_mode {
            ViewMode::Runs => self.runs.len(),
            ViewMode::Jobs => self.jobs.len(),
            ViewMode::Conflicts => self.conflicts.len(),
            ViewMode::Unresolved => self.unresolved.len(),
            ViewMode::Inspect => self.inspection.len(),
        }
    }

    pub fn clamp_selection(&mut self) {
        if self.selected_index >= self.row_count() {
            self.selected_index = self.row_count().saturating_sub(1);
        }
        self.list_state.select(Some(self.selected_index));
    }

    fn switch_view(&mut self, view: ViewMode) {
        self.view_mode = view;
        self.selected_index = 0;
        if let Some(idx) = ViewMode::MENU.iter().position(|v| *v == view) {
            self.menu_selected_index = idx;
        }
    }

    fn reload_run_view(&self) {
        let Some(run_id) = self.current_run else {
            return;
        };
        let cmd = match self.view_mode {
            ViewMode::Conflicts => AppCommand::Conflicts { run_id },
            ViewMode::Unresolved => AppCommand::Unresolved { run_id },
            ViewMode::Inspect => AppCommand::Inspect { run_id },
            _ => return,
        };
        let _ = self.cmd_tx.send(cmd);
    }

    /// Opens a view from the menu, asking the background for its data.
    fn open_view(&mut self, view: ViewMode) {
        self.switch_view(view);
        let cmd = match view {
            ViewMode::Runs => Some(AppCommand::Runs),
            ViewMode::Jobs => Some(AppCommand::Jobs),
            ViewMode::Conflicts => self.current_run.map(|run_id| AppCommand::Conflicts { run_id }),
            ViewMode::Unresolved => self.current_run.map(|run_id| AppCommand::Unresolved { run_id }),
            ViewMode::Inspect => self.current_run.map(|run_id| AppCommand::Inspect { run_id }),
        };
        match cmd {
            Some(cmd) => {
                let _ = self.cmd_tx.send(cmd);
            }
            None => self.add_log("⚠ Select a run first (Enter on a run, or `conflicts <run>`)".into()),
        }
    }

    /// Ghost-text completion for the command line.
    pub fn get_completion_hint(&self) -> Option<String> {
        let input = self.command_input.trim_start();
        if input.is_empty() {
            return None;
        }

        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.len() == 1 && !input.ends_with(' ') {
            return COMMANDS
                .iter()
                .find(|cmd| cmd.starts_with(parts[0]) && **cmd != parts[0])
                .map(|cmd| cmd[parts[0].len()..].to_string());
        }
        if parts[0] == "conflict" && parts.len() == 3 {
            let cur = parts[2];
            return CONFLICT_ACTIONS
                .iter()
                .find(|a| a.starts_with(cur) && **a != cur)
                .map(|a| a[cur.len()..].to_string());
        }
        None
    }

    pub fn handle_key_event(&mut self, key: KeyCode) -> bool {
        if self.input_mode == InputMode::Command {
            return self.handle_command_key(key);
        }

        match key {
            KeyCode::Char('/') => {
                self.input_mode = InputMode::Command;
                self.command_input.clear();
                self.command_cursor = 0;
                false
            }
            KeyCode::Char('q') => true,
            KeyCode::Left => {
                self.focus_area = FocusArea::Menu;
                false
            }
            KeyCode::Right => {
                self.focus_area = FocusArea::MainView;
                false
            }
            KeyCode::Up => {
                if self.focus_area == FocusArea::Menu {
                    self.menu_selected_index = self.menu_selected_index.saturating_sub(1);
                } else if self.selected_index > 0 {
                    self.selected_index -= 1;
                }
                self.list_state.select(Some(self.selected_index));
                false
            }
            KeyCode::Down => {
                if self.focus_area == FocusArea::Menu {
                    if self.menu_selected_index < ViewMode::MENU.len() - 1 {
                        self.menu_selected_index += 1;
                    }
                } else if self.selected_index < self.row_count().saturating_sub(1) {
                    self.selected_index += 1;
                }
                self.list_state.select(Some(self.selected_index));
                false
            }
            KeyCode::Enter | KeyCode::Char('c') => {
                if self.focus_area == FocusArea::Menu {
                    let view = ViewMode::MENU[self.menu_selected_index.min(ViewMode::MENU.len() - 1)];
                    self.open_view(view);
                    self.focus_area = FocusArea::MainView;
                } else if self.view_mode == ViewMode::Runs {
                    // drill into the selected run
                    if let Some(run) = self.runs.get(self.selected_index) {
                        let _ = self.cmd_tx.send(AppCommand::Unresolved { run_id: run.id });
                    }
                }
                false
            }
            KeyCode::Char('u') => {
                if let Some(run) = self.selected_run_id() {
                    let _ = self.cmd_tx.send(AppCommand::Unresolved { run_id: run });
                }
                false
            }
            KeyCode::Char('i') => {
                if let Some(run) = self.selected_run_id() {
                    let _ = self.cmd_tx.send(AppCommand::Inspect { run_id: run });
                }
                false
            }
            KeyCode::Char('x') => {
                if let Some(run) = self.selected_run_id() {
                    let _ = self.cmd_tx.send(AppCommand::Conflicts { run_id: run });
                }
                false
            }
            KeyCode::Char('r') => {
                let _ = self.cmd_tx.send(AppCommand::Runs);
                let _ = self.cmd_tx.send(AppCommand::Jobs);
                self.reload_run_view();
                false
            }
            _ => false,
        }
    }

    /// Run under the cursor in the runs view, otherwise the run currently shown.
    fn selected_run_id(&self) -> Option<i32> {
        if self.view_mode == ViewMode::Runs {
            self.runs.get(self.selected_index).map(|r| r.id)
        } else {
            self.current_run
        }
    }

    /// Returns true when the line asked to quit.
    fn handle_command_key(&mut self, key: KeyCode) -> bool {
        match key {
            KeyCode::Enter => {
                let cmd_owned = self.command_input.trim().to_string();
                self.command_input.clear();
                self.command_cursor = 0;
                self.input_mode = InputMode::Normal;
                if cmd_owned.is_empty() {
                    return false;
                }
                let app_cmd = AppCommand::from_str(&cmd_owned)
                    .unwrap_or_else(|_| AppCommand::Unknown(cmd_owned.clone()));
                self.command_history.push(cmd_owned);
                self.command_history_index = None;
                if app_cmd == AppCommand::Quit {
                    return true;
                }
                let _ = self.cmd_tx.send(app_cmd);
            }
            KeyCode::Esc => {
                self.command_input.clear();
                self.command_cursor = 0;
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Tab => {
                if let Some(hint) = self.get_completion_hint() {
                    let insert = format!("{} ", hint);
                    self.command_input.insert_str(self.command_cursor, &insert);
                    self.command_cursor += insert.len();
                }
            }
            KeyCode::Up => {
                if self.command_history.is_empty() {
                    return false;
                }
                let next = match self.command_history_index {
                    None => self.command_history.len() - 1,
                    Some(i) => i.saturating_sub(1),
                };
                self.recall(next);
            }
            KeyCode::Down => {
                let Some(i) = self.command_history_index else {
                    return false;
                };
                if i + 1 >= self.command_history.len() {
                    self.command_history_index = None;
                    self.command_input.clear();
                    self.command_cursor = 0;
                } else {
                    self.recall(i + 1);
                }
            }
            KeyCode::Backspace => {
                if self.command_cursor > 0 {
                    self.command_cursor -= 1;
                    self.command_input.remove(self.command_cursor);
                }
            }
            KeyCode::Delete => {
                if self.command_cursor < self.command_input.len() {
                    self.command_input.remove(self.command_cursor);
                }
            }
            KeyCode::Left => self.command_cursor = self.command_cursor.saturating_sub(1),
            KeyCode::Right => {
                if self.command_cursor < self.command_input.len() {
                    self.command_cursor += 1;
                }
            }
            KeyCode::Home => self.command_cursor = 0,
            KeyCode::End => self.command_cursor = self.command_input.len(),
            KeyCode::Char(c) if c.is_ascii() => {
                self.command_input.insert(self.command_cursor, c);
                self.command_cursor += 1;
            }
            _ => {}
        }
        false
    }

    fn recall(&mut self, idx: usize) {
        self.command_history_index = Some(idx);
        if let Some(cmd) = self.command_history.get(idx) {
            self.command_input = cmd.clone();
            self.command_cursor = self.command_input.len();
        }
    }
}
