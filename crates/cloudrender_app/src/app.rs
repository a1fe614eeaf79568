use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Local;
use cloudrender_core::SessionState;
use cloudrender_engine::{
    EndpointAuthenticator, NewJobRequest, Orchestrator, OrchestratorSettings, PooledTransport,
    Rejected,
};
use engine_logging::{engine_info, engine_warn};

use crate::commands::{self, Command, HELP};
use crate::config::{AppConfig, CONFIG_FILENAME};
use crate::logging;
use crate::timers::TimerWheel;
use crate::view;

/// Longest nap between loop iterations when no timer is due sooner.
const IDLE_SLEEP: Duration = Duration::from_millis(5);

enum Input {
    Line(String),
    Closed,
}

pub fn run() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME));
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    logging::initialize(config.log_destination, logging::parse_level(&config.log_level));
    engine_info!("cloudrender shell starting with {:?}", config_path);

    let orchestrator = Orchestrator::new(
        SessionState::new(config.session.clone()),
        Arc::new(PooledTransport::new(config.transport_settings())),
        Arc::new(EndpointAuthenticator::new(config.auth_url.clone())),
        OrchestratorSettings::default(),
    )
    .context("starting the event loop")?;

    let (input_tx, input_rx) = mpsc::channel();
    thread::spawn(move || read_lines(input_tx));

    println!("cloudrender shell. Type `help` for commands.");
    if !config.username.is_empty() {
        println!("Last login: {}", config.username);
    }

    let mut shell = Shell {
        orchestrator,
        timers: TimerWheel::new(),
        config,
        config_path,
        pending_username: None,
        was_logged_in: false,
        last_progress: Vec::new(),
    };
    shell.run(&input_rx);
    shell.shutdown();
    engine_info!("cloudrender shell stopped");
    Ok(())
}

fn read_lines(tx: Sender<Input>) {
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        if tx.send(Input::Line(line)).is_err() {
            return;
        }
    }
    let _ = tx.send(Input::Closed);
}

struct Shell {
    orchestrator: Orchestrator,
    timers: TimerWheel,
    config: AppConfig,
    config_path: PathBuf,
    /// Username of the login in flight, saved once the session has a token.
    pending_username: Option<String>,
    was_logged_in: bool,
    last_progress: Vec<String>,
}

impl Shell {
    fn run(&mut self, input: &Receiver<Input>) {
        let mut closing = false;
        loop {
            while !closing {
                match input.try_recv() {
                    Ok(Input::Line(line)) => {
                        if !self.handle_line(&line) {
                            return;
                        }
                    }
                    Ok(Input::Closed) | Err(TryRecvError::Disconnected) => closing = true,
                    Err(TryRecvError::Empty) => break,
                }
            }

            self.fire_due_timers();
            self.refresh();

            // Piped input: let the last operation finish before leaving.
            if closing && !self.orchestrator.is_busy() {
                return;
            }
            let nap = self
                .timers
                .until_next(Instant::now())
                .map_or(IDLE_SLEEP, |until| until.min(IDLE_SLEEP));
            thread::sleep(nap);
        }
    }

    fn fire_due_timers(&mut self) {
        for id in self.timers.due(Instant::now()) {
            // An earlier firing in this batch may have removed it.
            if self.timers.contains(id) {
                self.orchestrator.on_timer(&mut self.timers, id);
            }
        }
    }

    /// Prints queued reports and changed progress lines.
    fn refresh(&mut self) {
        let (reports, progress, logged_in) = {
            let mut session = self.orchestrator.session_mut();
            if !session.consume_dirty() {
                return;
            }
            (
                session.take_reports(),
                view::format_progress(&session),
                session.is_logged_in(),
            )
        };

        for report in &reports {
            println!("{}", view::format_report(report, Local::now()));
        }
        if progress != self.last_progress {
            for line in &progress {
                println!("  {line}");
            }
            self.last_progress = progress;
        }

        if logged_in && !self.was_logged_in {
            self.remember_username();
        }
        self.was_logged_in = logged_in;
    }

    fn handle_line(&mut self, line: &str) -> bool {
        match commands::parse(line) {
            Ok(Some(command)) => self.dispatch(command),
            Ok(None) => true,
            Err(err) => {
                println!("{err}");
                true
            }
        }
    }

    /// Returns false once the user asked to quit.
    fn dispatch(&mut self, command: Command) -> bool {
        match command {
            Command::Login { username, password } => {
                self.pending_username = Some(username.trim().to_string());
                let started = self.orchestrator.login(&mut self.timers, &username, &password);
                if started.is_err() {
                    self.pending_username = None;
                }
                announce(started);
            }
            Command::FetchJobs => announce(self.orchestrator.fetch_jobs(&mut self.timers)),
            Command::List => {
                let session = self.orchestrator.session();
                println!("{}", view::format_jobs(session.registry()));
            }
            Command::Select(id) => {
                if self.orchestrator.select(&id) {
                    println!("Selected {id}.");
                } else {
                    println!("Unknown job {id}.");
                }
            }
            Command::Create {
                name,
                file,
                project,
            } => {
                let request = NewJobRequest {
                    name,
                    source: file,
                    project,
                };
                announce(self.orchestrator.create_job(&mut self.timers, request));
            }
            Command::Render => announce(self.orchestrator.render(&mut self.timers)),
            Command::Download => announce(self.orchestrator.download(&mut self.timers)),
            Command::Folder(path) => {
                let folder = (!path.as_os_str().is_empty()).then_some(path);
                self.orchestrator
                    .session_mut()
                    .settings_mut()
                    .download_folder = folder.clone();
                match &folder {
                    Some(folder) => println!("Downloads go to {}.", folder.display()),
                    None => println!("Download folder cleared."),
                }
                self.config.session.download_folder = folder;
                self.save_config();
            }
            Command::Status => {
                let busy = self.orchestrator.is_busy();
                let session = self.orchestrator.session();
                println!("{}", view::format_status(&session, busy));
            }
            Command::Cancel(kind) => {
                if !self.orchestrator.cancel(&mut self.timers, kind) {
                    println!("{kind} is not running.");
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return false,
        }
        true
    }

    fn remember_username(&mut self) {
        let Some(username) = self.pending_username.take() else {
            return;
        };
        if username != self.config.username {
            self.config.username = username;
            self.save_config();
        }
    }

    fn save_config(&self) {
        if let Err(err) = self.config.save(&self.config_path) {
            engine_warn!("{err}");
            println!("Could not save settings: {err}");
        }
    }

    fn shutdown(self) {
        let Shell {
            orchestrator,
            mut timers,
            ..
        } = self;
        orchestrator.shutdown(&mut timers);
        if !timers.is_empty() {
            engine_warn!("Timers still registered after shutdown");
        }
    }
}

fn announce(started: Result<(), Rejected>) {
    if let Err(rejected) = started {
        println!("{rejected}");
    }
}
