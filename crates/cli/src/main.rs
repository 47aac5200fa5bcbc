use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keysum_config::{BoardDescriptor, KeyEvent, ScenarioAssertion, ScenarioScript};
use keysum_core::bus::{MmioPorts, SystemBus};
use keysum_core::calculator::{Calculator, DebouncePolicy};
use keysum_core::metrics::LoopMetrics;
use keysum_core::peripherals::display::SevenSegDisplay;
use keysum_core::peripherals::keypad::KeypadState;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

const EXIT_OK: i32 = 0;
const EXIT_ASSERT_FAIL: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;

/// Upper bound on any scenario's iteration budget. Scripts asking for more
/// are treated as configuration mistakes, not honored.
const MAX_ALLOWED_ITERATIONS: u64 = 50_000_000;

#[derive(Parser, Debug)]
#[command(author, version, about = "keysum Simulator - Minisys keypad adder", long_about = None)]
struct Args {
    /// Enable verbose event-level tracing
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed a key sequence through the calculator loop
    Run {
        /// Path to a board descriptor (YAML); defaults to the Minisys-1A map
        #[arg(short, long)]
        board: Option<PathBuf>,

        /// Comma-separated keys, e.g. "3,4,A" ('A' or '+' is the add key)
        #[arg(short, long)]
        keys: String,

        /// Keep polling the idle keypad until this many iterations have run
        #[arg(long)]
        max_iterations: Option<u64>,
    },
    /// Execute a scenario script and evaluate its assertions
    Test {
        /// Path to the scenario script (YAML)
        #[arg(short, long)]
        script: PathBuf,

        /// Directory to receive result.json
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Write a JUnit XML report to this path
        #[arg(long)]
        junit: Option<PathBuf>,
    },
}

fn main() {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the machine-readable result.
    if args.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
    }

    let outcome = match args.command {
        Command::Run {
            board,
            keys,
            max_iterations,
        } => cmd_run(board.as_deref(), &keys, max_iterations),
        Command::Test {
            script,
            output_dir,
            junit,
        } => cmd_test(&script, output_dir.as_deref(), junit.as_deref()),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    }
}

/// The Minisys-1A register map from the original firmware, used when no
/// board file is given.
fn default_board() -> BoardDescriptor {
    BoardDescriptor {
        name: "minisys-1a".to_string(),
        ports: keysum_config::PortMap {
            status: 0xFFFF_FC12,
            keycode: 0xFFFF_FC10,
            display: 0xFFFF_0010,
        },
        debounce_spins: 2000,
    }
}

struct Harness {
    calc: Calculator<MmioPorts>,
    keypad: Arc<KeypadState>,
    metrics: Arc<LoopMetrics>,
}

fn build_harness(board: &BoardDescriptor, debounce: DebouncePolicy) -> Result<Harness> {
    let (bus, keypad) = SystemBus::from_config(board)?;
    let ports = MmioPorts::new(bus, board);
    let mut calc = Calculator::new(ports, debounce);
    let metrics = Arc::new(LoopMetrics::new());
    calc.observers.push(metrics.clone());
    Ok(Harness {
        calc,
        keypad,
        metrics,
    })
}

fn load_board(path: Option<&Path>) -> Result<BoardDescriptor> {
    match path {
        Some(p) => {
            info!("Loading board descriptor: {:?}", p);
            BoardDescriptor::from_file(p)
        }
        None => {
            info!("Using built-in Minisys-1A board");
            Ok(default_board())
        }
    }
}

fn cmd_run(board_path: Option<&Path>, keys: &str, max_iterations: Option<u64>) -> Result<i32> {
    info!("Starting keysum Simulator");

    let board = load_board(board_path)?;
    let codes = keysum_config::parse_key_list(keys)?;
    // Hosted runs skip the hardware debounce spin; the key taps below are
    // already one poll apart.
    let mut h = build_harness(&board, DebouncePolicy::None)?;

    // Tap each key: one polled iteration pressed, one released, so the
    // edge detector sees every key as a fresh event.
    for code in codes {
        h.keypad.press(code);
        h.calc.step();
        h.keypad.release();
        h.calc.step();
    }

    if let Some(max) = max_iterations {
        let done = h.calc.iterations();
        if max > done {
            let stop = AtomicBool::new(false);
            h.calc.run(&stop, Some(max - done));
        }
    }

    let display_value = h
        .calc
        .ports()
        .bus()
        .find::<SevenSegDisplay>("display")
        .map(|d| d.value())
        .unwrap_or(0);

    info!("Display: {}", display_value);
    info!("Running sum: {}", h.calc.running_sum());
    info!("Pending digit: {}", h.calc.current_digit());
    info!(
        "Processed {} key events in {} iterations ({:.0} iterations/s)",
        h.metrics.get_key_events(),
        h.metrics.get_iterations(),
        h.metrics.get_ips()
    );
    println!("{}", display_value);

    Ok(EXIT_OK)
}

struct AssertionOutcome {
    name: String,
    failure: Option<String>,
}

fn evaluate_assertions(script: &ScenarioScript, h: &Harness) -> Vec<AssertionOutcome> {
    let display = h
        .calc
        .ports()
        .bus()
        .find::<SevenSegDisplay>("display")
        .map(|d| d.value())
        .unwrap_or(0);

    script
        .assertions
        .iter()
        .map(|assertion| match assertion {
            ScenarioAssertion::DisplayShows(a) => AssertionOutcome {
                name: format!("display_shows {}", a.display_shows),
                failure: (display != a.display_shows)
                    .then(|| format!("display shows {}, expected {}", display, a.display_shows)),
            },
            ScenarioAssertion::SumEquals(a) => AssertionOutcome {
                name: format!("sum_equals {}", a.sum_equals),
                failure: (h.calc.running_sum() != a.sum_equals).then(|| {
                    format!(
                        "running sum is {}, expected {}",
                        h.calc.running_sum(),
                        a.sum_equals
                    )
                }),
            },
            ScenarioAssertion::DigitEquals(a) => AssertionOutcome {
                name: format!("digit_equals {}", a.digit_equals),
                failure: (h.calc.current_digit() != a.digit_equals).then(|| {
                    format!(
                        "current digit is {}, expected {}",
                        h.calc.current_digit(),
                        a.digit_equals
                    )
                }),
            },
        })
        .collect()
}

fn cmd_test(script_path: &Path, output_dir: Option<&Path>, junit: Option<&Path>) -> Result<i32> {
    let script = ScenarioScript::from_file(script_path)?;

    if script.limits.max_iterations > MAX_ALLOWED_ITERATIONS {
        anyhow::bail!(
            "max_iterations {} exceeds the allowed maximum of {}",
            script.limits.max_iterations,
            MAX_ALLOWED_ITERATIONS
        );
    }

    let board = match &script.board {
        Some(rel) => {
            let board_path = script_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(rel);
            info!("Loading board descriptor: {:?}", board_path);
            BoardDescriptor::from_file(&board_path)?
        }
        None => default_board(),
    };

    // Scenarios step on iteration numbers, not wall time, so the debounce
    // delay is skipped entirely.
    let mut h = build_harness(&board, DebouncePolicy::None)?;

    info!(
        "Running scenario for up to {} iterations",
        script.limits.max_iterations
    );

    let mut events = script.events.iter().peekable();
    for n in 0..script.limits.max_iterations {
        while events.peek().is_some_and(|e| e.at() == n) {
            match events.next().expect("peeked event") {
                KeyEvent::Press(e) => h.keypad.press(e.press),
                KeyEvent::Release(e) => {
                    if e.release {
                        h.keypad.release();
                    }
                }
            }
        }
        h.calc.step();
    }

    let outcomes = evaluate_assertions(&script, &h);
    let failures: Vec<&AssertionOutcome> =
        outcomes.iter().filter(|o| o.failure.is_some()).collect();
    let passed = failures.is_empty();

    for o in &outcomes {
        match &o.failure {
            None => info!("PASS {}", o.name),
            Some(msg) => tracing::error!("FAIL {}: {}", o.name, msg),
        }
    }

    let result = build_result_json(&script, script_path, &board, &h, &outcomes, passed);

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output dir {:?}", dir))?;
        let result_path = dir.join("result.json");
        std::fs::write(&result_path, serde_json::to_string_pretty(&result)?)
            .with_context(|| format!("Failed to write {:?}", result_path))?;
        info!("Wrote {:?}", result_path);
    }

    if let Some(junit_path) = junit {
        std::fs::write(junit_path, junit_report(&outcomes))
            .with_context(|| format!("Failed to write JUnit report {:?}", junit_path))?;
        info!("Wrote {:?}", junit_path);
    }

    if passed {
        info!("Scenario passed");
        Ok(EXIT_OK)
    } else {
        tracing::error!("{} assertion(s) failed", failures.len());
        Ok(EXIT_ASSERT_FAIL)
    }
}

fn build_result_json(
    script: &ScenarioScript,
    script_path: &Path,
    board: &BoardDescriptor,
    h: &Harness,
    outcomes: &[AssertionOutcome],
    passed: bool,
) -> serde_json::Value {
    let display = h
        .calc
        .ports()
        .bus()
        .find::<SevenSegDisplay>("display")
        .map(|d| d.value())
        .unwrap_or(0);

    serde_json::json!({
        "status": if passed { "pass" } else { "fail" },
        "display": display,
        "running_sum": h.calc.running_sum(),
        "current_digit": h.calc.current_digit(),
        "metrics": {
            "iterations": h.metrics.get_iterations(),
            "key_events": h.metrics.get_key_events(),
            "display_writes": h.metrics.get_display_writes(),
            "iterations_per_second": h.metrics.get_ips(),
        },
        "config": {
            "script": script_path.display().to_string(),
            "board": board.name,
            "max_iterations": script.limits.max_iterations,
        },
        "assertions": outcomes.iter().map(|o| {
            serde_json::json!({
                "name": o.name,
                "status": if o.failure.is_none() { "pass" } else { "fail" },
                "message": o.failure,
            })
        }).collect::<Vec<_>>(),
    })
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn junit_report(outcomes: &[AssertionOutcome]) -> String {
    let failures = outcomes.iter().filter(|o| o.failure.is_some()).count();
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<testsuite name=\"keysum test\" tests=\"{}\" failures=\"{}\">\n",
        outcomes.len(),
        failures
    ));
    for o in outcomes {
        match &o.failure {
            None => xml.push_str(&format!(
                "  <testcase name=\"{}\"/>\n",
                xml_escape(&o.name)
            )),
            Some(msg) => xml.push_str(&format!(
                "  <testcase name=\"{}\"><failure message=\"{}\"/></testcase>\n",
                xml_escape(&o.name),
                xml_escape(msg)
            )),
        }
    }
    xml.push_str("</testsuite>\n");
    xml
}
