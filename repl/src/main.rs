use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;
use std::{io::Write, path::PathBuf};

use clap::Parser;
use color_eyre::eyre::{self, Context};
use crossbeam_channel::Receiver;
use debugger::{Breakpoint, Debugger, WatchId, Watches};
use server::GdbConfig;
use state::{Project, StateManager};
use tracing_subscriber::filter::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

struct App {
    debugger: Debugger,
    debugger_events: Receiver<debugger::Event>,
    input_rx: Receiver<String>,

    #[allow(dead_code)]
    input_thread: JoinHandle<()>,
}

impl App {
    fn new(debugger: Debugger, debugger_events: Receiver<debugger::Event>) -> Self {
        // handle input
        let (input_tx, input_rx) = crossbeam_channel::unbounded();
        let input_thread = std::thread::spawn(move || {
            let mut buffer = String::new();
            loop {
                match std::io::stdin().read_line(&mut buffer) {
                    Ok(0) => {
                        let _ = input_tx.send("quit".to_string());
                        return;
                    }
                    Ok(_) => {
                        let input = buffer.trim().to_owned();
                        if input_tx.send(input).is_err() {
                            return;
                        }
                        buffer.clear();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "reading from stdin");
                        return;
                    }
                }
            }
        });

        Self {
            debugger,
            debugger_events,
            input_thread,
            input_rx,
        }
    }

    fn prompt(&self) -> eyre::Result<()> {
        print!("> ");
        std::io::stdout().flush()?;
        Ok(())
    }

    fn loop_step(&mut self) -> eyre::Result<ShouldQuit> {
        self.debugger.pump_timeout(POLL_INTERVAL);

        let events: Vec<_> = self.debugger_events.try_iter().collect();
        for event in events {
            if let ShouldQuit::True = self
                .handle_debugger_event(event)
                .context("handling debugger event")?
            {
                return Ok(ShouldQuit::True);
            }
        }

        match self.input_rx.try_recv() {
            Ok(input) => {
                let should_quit = match self.handle_input(&input) {
                    Ok(should_quit) => should_quit,
                    Err(e) => {
                        println!("error: {e:#}");
                        ShouldQuit::False
                    }
                };
                if let ShouldQuit::False = should_quit {
                    self.prompt()?;
                }
                Ok(should_quit)
            }
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(ShouldQuit::False),
            Err(crossbeam_channel::TryRecvError::Disconnected) => Ok(ShouldQuit::True),
        }
    }

    #[tracing::instrument(skip(self))]
    fn handle_debugger_event(&mut self, event: debugger::Event) -> eyre::Result<ShouldQuit> {
        use debugger::Event;

        match event {
            Event::BreakpointsChanged => tracing::debug!("breakpoints changed"),
            Event::WatchesChanged(batch) => {
                let watches = self.debugger.watches();
                for id in batch.changed {
                    if let Some(watch) = watches.get(id) {
                        println!("watch {} = {}", watch.full_expression, watch.value);
                    }
                }
            }
            Event::BacktraceChanged => {
                if let Some(frame) = self.debugger.selected_frame() {
                    println!("in {}", frame.function_name);
                }
            }
            Event::RegistersChanged => tracing::debug!("registers changed"),
            Event::EvaluationReady(value) => println!("{value}"),
            Event::ProcessExited => {
                println!("debugger exited");
                return Ok(ShouldQuit::True);
            }
            Event::Stopped(signal) => {
                println!("program stopped: {} ({})", signal.name, signal.description)
            }
            Event::CommandFailed(message) => println!("error: {message}"),
            Event::ConsoleOutput(output) => print!("{output}"),
            Event::LocationChanged(location) => {
                println!("at {}:{}", location.path.display(), location.line)
            }
            Event::LocalsReady(_)
            | Event::ParamsReady(_)
            | Event::DisassemblyReady(_)
            | Event::MemoryReady(_) => {}
            Event::ProgramExited(code) => println!("program exited with code {code}"),
        }
        Ok(ShouldQuit::False)
    }

    fn handle_input(&mut self, input: &str) -> eyre::Result<ShouldQuit> {
        let (command, rest) = input.split_once(' ').unwrap_or((input, ""));
        let rest = rest.trim();
        match command {
            "q" | "quit" => return Ok(ShouldQuit::True),
            "" => {}
            "r" | "run" => self.debugger.run().context("starting program")?,
            "c" | "continue" => {
                tracing::debug!("executing continue command");
                self.debugger.r#continue().context("resuming execution")?;
            }
            "n" | "next" => self.debugger.next().context("stepping over")?,
            "s" | "step" => self.debugger.step().context("stepping in")?,
            "finish" => self.debugger.finish().context("stepping out")?,
            "b" | "break" => {
                let breakpoint: Breakpoint = rest.parse()?;
                let index = self.debugger.add_breakpoint(breakpoint)?;
                println!("breakpoint {index} added");
            }
            "d" | "delete" => {
                let index = rest.parse().context("breakpoint index")?;
                let removed = self.debugger.remove_breakpoint(index)?;
                println!(
                    "removed breakpoint at {}:{}",
                    removed.path.display(),
                    removed.line
                );
            }
            "cond" => {
                let (index, condition) = rest.split_once(' ').unwrap_or((rest, ""));
                let index = index.parse().context("breakpoint index")?;
                self.debugger
                    .set_breakpoint_condition(index, Some(condition.to_string()))?;
            }
            "enable" | "disable" => {
                let index = rest.parse().context("breakpoint index")?;
                self.debugger
                    .set_breakpoint_enabled(index, command == "enable")?;
            }
            "w" | "watch" => {
                self.debugger.add_watch(rest)?;
            }
            "uw" | "unwatch" => {
                if !self.debugger.remove_watch(rest) {
                    println!("not watching {rest}");
                }
            }
            "p" | "print" => {
                // printed when it arrives
                let _ = self.debugger.evaluate(rest)?;
            }
            "bt" => {
                for (level, frame) in self.debugger.backtrace().iter().enumerate() {
                    let path = frame
                        .path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "??".to_string());
                    println!("#{level} {} at {path}:{}", frame.function_name, frame.line);
                }
            }
            "f" | "frame" => {
                let level = rest.parse().context("frame level")?;
                self.debugger.select_frame(level)?;
            }
            "locals" => print_lines(self.debugger.locals()),
            "args" => print_lines(self.debugger.params()),
            "disas" => print_lines(self.debugger.disassembly()),
            "mem" => print_lines(self.debugger.memory()),
            "regs" => {
                for register in self.debugger.registers() {
                    println!("{:<8} {:<20} {}", register.name, register.hex_value, register.decimal_value);
                }
            }
            "x" => {
                let (address, count) = rest.split_once(' ').unwrap_or((rest, "16"));
                let count = count.trim().parse().context("byte count")?;
                self.debugger.examine_memory(address, count)?;
            }
            "info" if rest.is_empty() => self.print_session(),
            _ => self.debugger.console(input)?,
        }
        Ok(ShouldQuit::False)
    }

    fn print_session(&self) {
        for (index, breakpoint) in self.debugger.breakpoints().iter().enumerate() {
            let mut line = format!("{index}: {}:{}", breakpoint.path.display(), breakpoint.line);
            if let Some(condition) = &breakpoint.condition {
                line.push_str(&format!(" if {condition}"));
            }
            if !breakpoint.enabled {
                line.push_str(" (disabled)");
            }
            println!("{line}");
        }
        let watches = self.debugger.watches();
        for root in watches.roots() {
            print_watch(watches, *root, 0);
        }
    }
}

fn print_watch(watches: &Watches, id: WatchId, depth: usize) {
    let Some(watch) = watches.get(id) else {
        return;
    };
    println!("{:indent$}{} = {}", "", watch.display_name, watch.value, indent = depth * 2);
    for child in watch.children() {
        print_watch(watches, *child, depth + 1);
    }
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

#[derive(Debug, Parser)]
struct Args {
    /// Program to debug
    program: Option<PathBuf>,

    /// GDB configuration file (JSON)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Debugger binary
    #[clap(long)]
    gdb: Option<PathBuf>,

    #[clap(short, long)]
    breakpoints: Vec<Breakpoint>,

    #[clap(short, long)]
    watch: Vec<String>,

    /// Saved breakpoints and watches
    #[clap(long)]
    state: Option<PathBuf>,

    #[clap(long, default_value = "log.log")]
    log_file: PathBuf,
}

fn main() -> eyre::Result<()> {
    color_eyre::install().context("installing color_eyre")?;
    let args = Args::parse();

    let log_file = std::fs::File::create(&args.log_file)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(Mutex::new(log_file))
        .init();

    let mut config = match &args.config {
        Some(path) => GdbConfig::from_path(path).context("loading gdb configuration")?,
        None => GdbConfig::default(),
    };
    if args.program.is_some() {
        config.program = args.program.clone();
    }
    if args.gdb.is_some() {
        config.gdb_path = args.gdb.clone();
    }

    let (events_tx, debugger_events) = crossbeam_channel::unbounded();
    // no editor, so no source edits
    let (_edits_tx, edits_rx) = crossbeam_channel::unbounded();
    let mut debugger =
        Debugger::spawn(&config, events_tx, edits_rx).context("creating debugger")?;
    debugger
        .wait_until(server::STARTUP_TIMEOUT, |d| d.is_ready())
        .context("waiting for gdb to start")?;

    let state_path = args.state.clone().unwrap_or_else(state::default_path);
    let mut state_manager = StateManager::new(state_path).context("loading state")?;
    if let Some(project) = config.program.as_deref().and_then(|p| state_manager.project(p)) {
        tracing::debug!(program = %project.program.display(), "restoring saved session");
        project.restore(&mut debugger).context("restoring session")?;
    }

    for breakpoint in args.breakpoints {
        tracing::debug!(?breakpoint, "adding breakpoint");
        debugger
            .add_breakpoint(breakpoint)
            .context("adding breakpoint")?;
    }
    for expression in &args.watch {
        debugger.add_watch(expression).context("adding watch")?;
    }
    tracing::debug!("breakpoints added");

    let mut app = App::new(debugger, debugger_events);
    tracing::debug!("debugger set up");
    app.prompt()?;
    loop {
        match app.loop_step() {
            Ok(ShouldQuit::True) => break,
            Ok(ShouldQuit::False) => {}
            Err(e) => eyre::bail!("Error running command: {e}"),
        }
    }

    if let Some(program) = config.program {
        state_manager.update_project(Project::capture(program, &app.debugger));
        state_manager.save().context("saving state")?;
    }
    app.debugger.stop().context("stopping debugger")?;
    Ok(())
}

enum ShouldQuit {
    True,
    False,
}
