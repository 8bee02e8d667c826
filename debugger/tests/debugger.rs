//! Session tests against a mock debugger
//!
//! Responses are written to the mock before the command that triggers them
//! is queued where the test thread has to pump at the same time; the client
//! only reads them once it has written the command.

use std::io::IsTerminal;
use std::path::Path;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use debugger::{Breakpoint, Debugger, Event, SourceEdit};
use eyre::Result;
use tracing_subscriber::EnvFilter;
use transport::testing::MockDebugger;

const TIMEOUT: Duration = Duration::from_secs(5);

#[ctor::ctor]
fn init() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::stderr().is_terminal() || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init();
    }

    let _ = color_eyre::install();
}

struct DebuggerTestHarness {
    debugger: Debugger,
    mock: MockDebugger,
    notifications: Receiver<Event>,
    edits: Sender<SourceEdit>,
}

impl DebuggerTestHarness {
    fn start() -> Result<Self> {
        let (transport, mut mock) = MockDebugger::pair()?;
        let (tx, notifications) = crossbeam_channel::unbounded();
        let (edits, edits_rx) = crossbeam_channel::unbounded();
        let mut debugger = Debugger::with_transport(transport, tx, edits_rx)?;

        mock.text("GNU gdb (GDB) 14.1")?;
        mock.prompt()?;
        for expected in [
            "set confirm off",
            "set width 0",
            "set height 0",
            "set print pretty off",
        ] {
            assert_eq!(mock.respond(&[])?, expected);
        }
        debugger.wait_until(TIMEOUT, |d| d.is_ready() && !d.command_in_flight())?;

        Ok(Self {
            debugger,
            mock,
            notifications,
            edits,
        })
    }

    /// Pump until a notification matching `pred` arrives
    fn wait_for<F>(&mut self, message: &str, pred: F) -> Result<Event>
    where
        F: Fn(&Event) -> bool,
    {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            for event in self.notifications.try_iter() {
                if pred(&event) {
                    tracing::debug!(?event, "received expected notification");
                    return Ok(event);
                }
                tracing::trace!(?event, "non-matching notification");
            }
            if Instant::now() >= deadline {
                eyre::bail!("did not receive {message}");
            }
            self.debugger.pump_timeout(Duration::from_millis(10));
        }
    }

    /// Queue a scripted `print` and wait for it, so everything sent before
    /// it has been handled
    fn sync(&mut self) -> Result<()> {
        self.mock.post_prompt()?;
        self.mock.value_history(1, "0")?;
        self.mock.prompt()?;
        self.debugger.evaluate_blocking("0", TIMEOUT)?;
        assert_eq!(self.mock.expect_command()?, "print 0");
        Ok(())
    }

    /// Answer the watch refresh that follows an updating command
    fn refresh(&mut self) -> Result<()> {
        assert_eq!(self.mock.respond(&[])?, "display");
        Ok(())
    }

    fn drain(&self) -> Vec<Event> {
        self.notifications.try_iter().collect()
    }
}

#[test]
fn frames_give_backtrace() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;

    h.debugger.console("backtrace")?;
    assert_eq!(h.mock.expect_command()?, "backtrace");
    h.mock.post_prompt()?;
    h.mock.frame(0, "inner", "/src/main.c", 4)?;
    h.mock.frame(1, "main", "/src/main.c", 12)?;
    h.mock.prompt()?;
    h.refresh()?;

    h.wait_for("backtrace", |e| matches!(e, Event::BacktraceChanged))?;
    let backtrace = h.debugger.backtrace();
    assert_eq!(backtrace.len(), 2);
    assert_eq!(backtrace[1].function_name, "main");
    assert_eq!(backtrace[1].line, 12);

    let selected = h.debugger.selected_frame().unwrap();
    assert_eq!(selected.function_name, "inner");
    assert_eq!(selected.path.as_deref(), Some(Path::new("/src/main.c")));
    Ok(())
}

#[test]
fn selecting_a_frame_keeps_backtrace() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    h.debugger.console("bt")?;
    assert_eq!(h.mock.expect_command()?, "bt");
    h.mock.post_prompt()?;
    h.mock.frame(0, "inner", "/src/main.c", 4)?;
    h.mock.frame(1, "main", "/src/main.c", 12)?;
    h.mock.prompt()?;
    h.refresh()?;
    h.wait_for("backtrace", |e| matches!(e, Event::BacktraceChanged))?;

    assert!(h.debugger.select_frame(5).is_err());
    h.debugger.select_frame(1)?;
    assert_eq!(h.mock.expect_command()?, "frame 1");
    h.mock.post_prompt()?;
    h.mock.frame(1, "main", "/src/main.c", 12)?;
    h.mock.prompt()?;
    assert_eq!(h.mock.respond(&["argc = 1"])?, "info locals");
    assert_eq!(h.mock.respond(&["No arguments."])?, "info args");
    h.debugger
        .wait_until(TIMEOUT, |d| d.locals() == ["argc = 1".to_string()])?;

    assert_eq!(h.debugger.backtrace().len(), 2);
    assert_eq!(h.debugger.selected_frame().unwrap().function_name, "main");
    Ok(())
}

#[test]
fn stop_location_refreshes_debug_info() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;

    h.debugger.next()?;
    assert!(h.debugger.is_running());
    assert_eq!(h.mock.expect_command()?, "next");
    h.mock.post_prompt()?;
    h.mock.source("/src/main.c", 13)?;
    h.mock.prompt()?;
    h.refresh()?;

    // the refresh is queued when `next` completes
    h.debugger.wait_until(TIMEOUT, |d| !d.is_running())?;
    assert!(
        h.drain()
            .iter()
            .any(|e| matches!(e, Event::LocationChanged(l) if l.line == 13))
    );
    assert_eq!(h.mock.expect_command()?, "backtrace");
    h.mock.post_prompt()?;
    h.mock.frame(0, "main", "/src/main.c", 13)?;
    h.mock.prompt()?;
    assert_eq!(h.mock.respond(&["x = 1"])?, "info locals");
    assert_eq!(h.mock.respond(&["argc = 1"])?, "info args");
    assert_eq!(h.mock.respond(&["rax            0x1c                28"])?, "info registers");
    assert_eq!(
        h.mock.respond(&["Dump of assembler code for function main:", "End of assembler dump."])?,
        "disas"
    );

    h.debugger
        .wait_until(TIMEOUT, |d| !d.disassembly().is_empty())?;
    let location = h.debugger.location().unwrap();
    assert_eq!(location.line, 13);
    assert!(!h.debugger.is_running());
    assert_eq!(h.debugger.backtrace().len(), 1);
    assert_eq!(h.debugger.locals(), ["x = 1".to_string()]);
    assert_eq!(h.debugger.params(), ["argc = 1".to_string()]);
    assert_eq!(h.debugger.registers()[0].name, "rax");
    assert_eq!(h.debugger.disassembly().len(), 2);
    Ok(())
}

#[test]
fn watch_refresh_preserves_node_identity() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;

    let root = h.debugger.add_watch("p")?;
    assert_eq!(h.mock.expect_command()?, "display p");
    h.mock.post_prompt()?;
    h.mock.display_struct(1, "p", &[("x", "1"), ("y", "2")])?;
    h.mock.prompt()?;
    // the root and both fields
    h.wait_for("first display", |e| {
        matches!(e, Event::WatchesChanged(batch) if batch.changed.len() == 3)
    })?;

    let watches = h.debugger.watches();
    let x = watches.find("p.x").unwrap();
    let y = watches.find("p.y").unwrap();
    assert_eq!(watches.get(root).unwrap().slot, Some(1));
    assert_eq!(watches.get(root).unwrap().children(), &[x, y]);
    h.drain();

    h.debugger.next()?;
    assert_eq!(h.mock.respond(&[])?, "next");
    assert_eq!(h.mock.expect_command()?, "display");
    h.mock.post_prompt()?;
    h.mock.display_struct(1, "p", &[("x", "3"), ("y", "2")])?;
    h.mock.prompt()?;

    let Event::WatchesChanged(batch) =
        h.wait_for("watches", |e| matches!(e, Event::WatchesChanged(_)))?
    else {
        unreachable!()
    };
    assert!(batch.changed.contains(&root));
    assert!(batch.changed.contains(&x));
    assert!(!batch.changed.contains(&y));
    assert!(batch.removed.is_empty());

    let watches = h.debugger.watches();
    assert_eq!(watches.find("p.x"), Some(x));
    assert_eq!(watches.find("p.y"), Some(y));
    assert_eq!(watches.get(x).unwrap().value, "3");
    Ok(())
}

#[test]
fn display_for_unknown_watch_is_discarded() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;

    h.debugger.console("display q")?;
    assert_eq!(h.mock.expect_command()?, "display q");
    h.mock.post_prompt()?;
    h.mock.display(7, "q", "1")?;
    h.mock.prompt()?;
    h.refresh()?;
    h.sync()?;

    assert!(h.debugger.watches().is_empty());
    assert!(
        !h.drain()
            .iter()
            .any(|e| matches!(e, Event::WatchesChanged(_)))
    );
    Ok(())
}

#[test]
fn removing_a_watch_undisplays_its_slot() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    h.debugger.add_watch("count")?;
    assert_eq!(h.mock.expect_command()?, "display count");
    h.mock.post_prompt()?;
    h.mock.display(2, "count", "4")?;
    h.mock.prompt()?;
    h.debugger
        .wait_until(TIMEOUT, |d| d.watches().find_by_slot(2).is_some())?;

    assert!(!h.debugger.remove_watch("missing"));
    assert!(h.debugger.remove_watch("count"));
    assert_eq!(h.mock.respond(&[])?, "undisplay 2");
    assert!(h.debugger.watches().is_empty());
    Ok(())
}

#[test]
fn error_is_reported_and_queue_continues() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;

    h.debugger.console("print nosuch")?;
    assert_eq!(h.mock.expect_command()?, "print nosuch");
    h.mock.post_prompt()?;
    h.mock.error("No symbol \"nosuch\" in current context.")?;
    h.mock.prompt()?;
    h.refresh()?;

    let Event::CommandFailed(message) =
        h.wait_for("failure", |e| matches!(e, Event::CommandFailed(_)))?
    else {
        unreachable!()
    };
    assert!(message.contains("nosuch"));

    h.mock.post_prompt()?;
    h.mock.value_history(1, "3")?;
    h.mock.prompt()?;
    assert_eq!(h.debugger.evaluate_blocking("1 + 2", TIMEOUT)?, "3");
    assert_eq!(h.mock.expect_command()?, "print 1 + 2");
    Ok(())
}

#[test]
fn failed_evaluation_returns_error() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    h.mock.post_prompt()?;
    h.mock.error("No symbol \"y\" in current context.")?;
    h.mock.prompt()?;

    let err = h.debugger.evaluate_blocking("y", TIMEOUT).unwrap_err();
    assert!(err.to_string().contains("No symbol"));
    Ok(())
}

#[test]
fn breakpoints_follow_edits() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    let path = Path::new("/src/main.c");

    h.debugger
        .add_breakpoint(Breakpoint::new(path, 10).with_condition("i > 2"))?;
    assert_eq!(
        h.mock
            .respond(&["Breakpoint 1 at 0x1149: file /src/main.c, line 10."])?,
        "break \"/src/main.c\":10"
    );
    h.debugger
        .wait_until(TIMEOUT, |d| d.breakpoints().get(0).unwrap().number == Some(1))?;
    assert_eq!(h.mock.respond(&[])?, "condition 1 i > 2");
    assert!(h.debugger.add_breakpoint(Breakpoint::new(path, 10)).is_err());

    h.edits.send(SourceEdit::LinesInserted {
        path: path.to_path_buf(),
        start_line: 5,
        count: 2,
    })?;
    h.wait_for("breakpoints", |e| matches!(e, Event::BreakpointsChanged))?;
    assert_eq!(h.debugger.breakpoints().get(0).unwrap().line, 12);
    assert_eq!(h.mock.respond(&[])?, "delete 1");
    assert_eq!(
        h.mock
            .respond(&["Breakpoint 2 at 0x1151: file /src/main.c, line 12."])?,
        "break \"/src/main.c\":12"
    );
    h.debugger
        .wait_until(TIMEOUT, |d| d.breakpoints().get(0).unwrap().number == Some(2))?;
    assert_eq!(h.mock.respond(&[])?, "condition 2 i > 2");

    h.debugger.on_lines_deleted(path, 12, 1);
    assert!(h.debugger.breakpoints().is_empty());
    assert_eq!(h.mock.respond(&[])?, "delete 2");
    Ok(())
}

#[test]
fn disabled_breakpoint_is_disabled_once_created() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    let index = h.debugger.add_breakpoint(Breakpoint::new("/src/lib.c", 3))?;
    h.debugger.set_breakpoint_enabled(index, false)?;

    assert_eq!(
        h.mock
            .respond(&["Breakpoint 4 at 0x1000: file /src/lib.c, line 3."])?,
        "break \"/src/lib.c\":3"
    );
    h.debugger
        .wait_until(TIMEOUT, |d| d.breakpoints().get(0).unwrap().number == Some(4))?;
    assert_eq!(h.mock.respond(&[])?, "disable 4");

    h.debugger.remove_breakpoint_at(Path::new("/src/lib.c"), 3)?;
    assert_eq!(h.mock.respond(&[])?, "delete 4");
    Ok(())
}

#[test]
fn signal_stops_the_debugee() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    h.debugger.r#continue()?;
    assert_eq!(h.mock.expect_command()?, "continue");
    h.mock.post_prompt()?;
    h.mock.signal("SIGSEGV", "Segmentation fault")?;
    h.mock.prompt()?;
    h.refresh()?;

    let Event::Stopped(signal) = h.wait_for("stop", |e| matches!(e, Event::Stopped(_)))? else {
        unreachable!()
    };
    assert_eq!(signal.name, "SIGSEGV");
    assert_eq!(signal.description, "Segmentation fault");
    Ok(())
}

#[test]
fn program_exit_code_is_reported() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    h.debugger.run()?;
    assert_eq!(h.mock.expect_command()?, "run");
    h.mock.post_prompt()?;
    h.mock.text("[Inferior 1 (process 42) exited with code 03]")?;
    h.mock.exited(3)?;
    h.mock.prompt()?;
    h.refresh()?;

    let event = h.wait_for("exit", |e| matches!(e, Event::ProgramExited(_)))?;
    assert_eq!(event, Event::ProgramExited(3));
    assert!(!h.debugger.has_exited());
    Ok(())
}

#[test]
fn process_exit_rejects_commands() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    let pending = h.debugger.evaluate("x")?;
    assert_eq!(h.mock.expect_command()?, "print x");

    h.mock.hang_up();
    h.wait_for("process exit", |e| matches!(e, Event::ProcessExited))?;

    assert!(h.debugger.has_exited());
    assert!(pending.recv().unwrap().is_err());
    assert!(h.debugger.console("next").is_err());
    assert!(h.debugger.evaluate("x").is_err());

    // the lists stay usable without a debugger
    h.debugger.add_breakpoint(Breakpoint::new("/src/main.c", 3))?;
    assert_eq!(h.debugger.breakpoints().len(), 1);
    Ok(())
}

#[test]
fn console_output_is_echoed() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    h.debugger.console("info line")?;
    assert_eq!(
        h.mock.respond(&["Line 5 of \"main.c\" starts at address 0x1149"])?,
        "info line"
    );
    h.refresh()?;

    let Event::ConsoleOutput(output) =
        h.wait_for("output", |e| matches!(e, Event::ConsoleOutput(_)))?
    else {
        unreachable!()
    };
    assert!(output.contains("Line 5"));
    Ok(())
}

#[test]
fn stop_discards_pending_commands() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    h.debugger.console("info frame")?;
    h.debugger.console("info threads")?;
    assert_eq!(h.mock.expect_command()?, "info frame");

    h.debugger.stop()?;
    assert!(h.debugger.has_exited());
    assert!(h.mock.try_command().is_none());
    assert!(h.debugger.console("next").is_err());
    Ok(())
}

fn watch_value(debugger: &Debugger, expression: &str) -> Option<String> {
    let watches = debugger.watches();
    let id = watches.find(expression)?;
    watches.get(id).map(|w| w.value.clone())
}

/// Register `expression` and answer its first display
fn watch(h: &mut DebuggerTestHarness, slot: u32, expression: &str, value: &str) -> Result<()> {
    h.debugger.add_watch(expression)?;
    assert_eq!(h.mock.expect_command()?, format!("display {expression}"));
    h.mock.post_prompt()?;
    h.mock.display(slot, expression, value)?;
    h.mock.prompt()?;
    h.debugger
        .wait_until(TIMEOUT, |d| d.watches().find_by_slot(slot).is_some())?;
    Ok(())
}

#[test]
fn watch_refresh_is_applied_as_a_whole() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    watch(&mut h, 1, "a", "1")?;
    watch(&mut h, 2, "b", "1")?;
    h.drain();

    h.debugger.next()?;
    assert_eq!(h.mock.respond(&[])?, "next");
    assert_eq!(h.mock.expect_command()?, "display");
    h.mock.post_prompt()?;
    h.mock.display(1, "a", "9")?;
    for _ in 0..5 {
        h.debugger.pump_timeout(Duration::from_millis(20));
    }
    assert_eq!(watch_value(&h.debugger, "a").as_deref(), Some("1"));
    assert_eq!(watch_value(&h.debugger, "b").as_deref(), Some("1"));
    assert!(
        !h.drain()
            .iter()
            .any(|e| matches!(e, Event::WatchesChanged(_)))
    );

    h.mock.display(2, "b", "9")?;
    h.mock.prompt()?;
    let Event::WatchesChanged(batch) =
        h.wait_for("watches", |e| matches!(e, Event::WatchesChanged(_)))?
    else {
        unreachable!()
    };
    assert_eq!(batch.changed.len(), 2);
    assert_eq!(watch_value(&h.debugger, "a").as_deref(), Some("9"));
    assert_eq!(watch_value(&h.debugger, "b").as_deref(), Some("9"));
    Ok(())
}

#[test]
fn stopping_mid_refresh_keeps_watches_usable() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    watch(&mut h, 1, "a", "1")?;

    h.debugger.next()?;
    let pending = h.debugger.evaluate("a")?;
    assert_eq!(h.mock.respond(&[])?, "next");
    assert_eq!(h.mock.expect_command()?, "display");
    h.mock.post_prompt()?;
    h.mock.display(1, "a", "9")?;
    h.debugger.pump_timeout(Duration::from_millis(50));

    h.debugger.stop()?;
    assert!(pending.recv().unwrap().is_err());
    assert!(!h.debugger.watches().in_update());
    h.drain();

    h.debugger.clear_watches();
    let events = h.drain();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::WatchesChanged(batch) if batch.removed.len() == 1)),
        "{events:?}"
    );
    assert!(h.debugger.watches().is_empty());
    Ok(())
}

#[test]
fn break_then_run_gives_single_frame() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    h.debugger.add_breakpoint(Breakpoint::new("main.c", 10))?;
    assert_eq!(
        h.mock
            .respond(&["Breakpoint 1 at 0x1149: file main.c, line 10."])?,
        "break \"main.c\":10"
    );

    h.debugger.run()?;
    assert_eq!(h.mock.expect_command()?, "run");
    h.mock.post_prompt()?;
    h.mock.text("Breakpoint 1, ")?;
    h.mock.frame(0, "main", "main.c", 10)?;
    h.mock.prompt()?;
    h.refresh()?;

    h.wait_for("backtrace", |e| matches!(e, Event::BacktraceChanged))?;
    assert_eq!(
        h.debugger.backtrace(),
        &[debugger::StackFrame {
            function_name: "main".to_string(),
            path: Some("main.c".into()),
            line: 10,
        }]
    );
    Ok(())
}

#[test]
fn first_display_creates_one_root() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    watch(&mut h, 1, "x", "5")?;

    let watches = h.debugger.watches();
    assert_eq!(watches.roots().len(), 1);
    let root = watches.get(watches.roots()[0]).unwrap();
    assert_eq!(root.full_expression, "x");
    assert_eq!(root.value, "5");
    assert!(root.children().is_empty());
    Ok(())
}

#[test]
fn removing_a_missing_watch_is_silent() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    watch(&mut h, 1, "a", "1")?;
    h.drain();

    assert!(!h.debugger.remove_watch("missing"));
    assert!(!h.debugger.remove_watch_by_slot(9));
    h.sync()?;

    let events = h.drain();
    assert!(
        !events.iter().any(|e| matches!(e, Event::WatchesChanged(_))),
        "{events:?}"
    );
    assert_eq!(h.debugger.watches().roots().len(), 1);
    Ok(())
}

#[test]
fn failed_evaluation_leaves_state_unchanged() -> Result<()> {
    let mut h = DebuggerTestHarness::start()?;
    h.debugger.console("bt")?;
    assert_eq!(h.mock.expect_command()?, "bt");
    h.mock.post_prompt()?;
    h.mock.frame(0, "main", "/src/main.c", 12)?;
    h.mock.prompt()?;
    h.refresh()?;
    h.wait_for("backtrace", |e| matches!(e, Event::BacktraceChanged))?;
    watch(&mut h, 1, "x", "5")?;
    h.debugger.add_breakpoint(Breakpoint::new("/src/main.c", 12))?;
    assert_eq!(
        h.mock
            .respond(&["Breakpoint 1 at 0x1149: file /src/main.c, line 12."])?,
        "break \"/src/main.c\":12"
    );
    h.debugger
        .wait_until(TIMEOUT, |d| d.breakpoints().get(0).unwrap().number == Some(1))?;

    let backtrace = h.debugger.backtrace().to_vec();
    let breakpoints: Vec<Breakpoint> = h.debugger.breakpoints().iter().cloned().collect();
    let watches: Vec<_> = h
        .debugger
        .watches()
        .walk()
        .into_iter()
        .filter_map(|(_, id)| h.debugger.watches().get(id).cloned())
        .collect();
    h.drain();

    let pending = h.debugger.evaluate("main")?;
    assert_eq!(h.mock.expect_command()?, "print main");
    h.mock.post_prompt()?;
    h.mock.error("No symbol \"main\" in current context.")?;
    h.mock.prompt()?;

    let Event::CommandFailed(message) =
        h.wait_for("failure", |e| matches!(e, Event::CommandFailed(_)))?
    else {
        unreachable!()
    };
    assert!(message.contains("No symbol \"main\""), "{message}");
    assert!(pending.recv().unwrap().is_err());

    assert_eq!(h.debugger.backtrace(), backtrace.as_slice());
    assert_eq!(
        h.debugger.breakpoints().iter().cloned().collect::<Vec<_>>(),
        breakpoints
    );
    let after: Vec<_> = h
        .debugger
        .watches()
        .walk()
        .into_iter()
        .filter_map(|(_, id)| h.debugger.watches().get(id).cloned())
        .collect();
    assert_eq!(after, watches);
    Ok(())
}
