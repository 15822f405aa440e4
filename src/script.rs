//! Train command scripts: parser and interpreter.
//!
//! Scripts are line-oriented. Each non-blank line that does not start with
//! `#` holds one command followed by whitespace-separated operands:
//!
//! | Command | Operands | Effect |
//! |---------|----------|--------|
//! | `speed` | integer -100..=100 | Negative forces reverse; 0 stops |
//! | `forward` / `reverse` / `toggle` | none | Set or flip direction |
//! | `horn` | none | Horn pulse |
//! | `bell` / `lights` | `on` or `off` | Switch bell / lights |
//! | `wait` | seconds (>= 0, fractional ok) | Pause, interruptible |
//! | `repeat` | count >= 1, then `times` | Open a loop |
//! | `end` | none | Close the innermost loop |
//!
//! Speeds are percentages of full throttle and are scaled onto the
//! locomotive's 0..=31 steps with [`speed_step`].
//!
//! # Example
//!
//! ```rust
//! use train_queue::script::{parse_script, Opcode};
//!
//! let script = parse_script(
//!     "# station departure\n\
//!      bell on\n\
//!      repeat 2 times\n\
//!        horn\n\
//!        wait 0.5\n\
//!      end\n\
//!      speed 40\n",
//! )
//! .unwrap();
//!
//! assert_eq!(script.len(), 6);
//! assert_eq!(script.commands()[0].opcode, Opcode::Bell);
//! assert_eq!(script.commands()[0].source_line, 2);
//! ```
//!
//! # Cancellation
//!
//! [`ScriptInterpreter::stop`] is cooperative. The flag is checked before
//! every command, before every loop iteration, and once per wait slice
//! inside `wait`, so a stop is observed within one slice.

use core::fmt;
use core::future::Future;
use core::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ScriptConfig;
use crate::error::ScriptError;
use crate::traits::{ActuatorGateway, CommandResult, DirectionCommand, MAX_SPEED_STEP};

/// Parsed operands of one command (arity is at most two).
pub type Operands = heapless::Vec<String, 2>;

// ============================================================================
// Commands
// ============================================================================

/// Script command keyword.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `speed <n>`
    Speed,
    /// `forward`
    Forward,
    /// `reverse`
    Reverse,
    /// `toggle`
    Toggle,
    /// `horn`
    Horn,
    /// `bell on|off`
    Bell,
    /// `lights on|off`
    Lights,
    /// `wait <seconds>`
    Wait,
    /// `repeat <n> times`
    Repeat,
    /// `end`
    End,
}

impl Opcode {
    /// Look up a keyword, case-insensitively.
    pub fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "speed" => Some(Opcode::Speed),
            "forward" => Some(Opcode::Forward),
            "reverse" => Some(Opcode::Reverse),
            "toggle" => Some(Opcode::Toggle),
            "horn" => Some(Opcode::Horn),
            "bell" => Some(Opcode::Bell),
            "lights" => Some(Opcode::Lights),
            "wait" => Some(Opcode::Wait),
            "repeat" => Some(Opcode::Repeat),
            "end" => Some(Opcode::End),
            _ => None,
        }
    }

    /// The keyword as written in scripts.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Opcode::Speed => "speed",
            Opcode::Forward => "forward",
            Opcode::Reverse => "reverse",
            Opcode::Toggle => "toggle",
            Opcode::Horn => "horn",
            Opcode::Bell => "bell",
            Opcode::Lights => "lights",
            Opcode::Wait => "wait",
            Opcode::Repeat => "repeat",
            Opcode::End => "end",
        }
    }

    /// Number of operands the keyword takes.
    pub const fn arity(&self) -> usize {
        match self {
            Opcode::Speed | Opcode::Bell | Opcode::Lights | Opcode::Wait => 1,
            Opcode::Repeat => 2,
            Opcode::Forward | Opcode::Reverse | Opcode::Toggle | Opcode::Horn | Opcode::End => 0,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded meaning of a command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Instruction {
    /// Speed percentage, -100..=100.
    Speed(i8),
    /// Direction change.
    Direction(DirectionCommand),
    /// Horn pulse.
    Horn,
    /// Bell on/off.
    Bell(bool),
    /// Lights on/off.
    Lights(bool),
    /// Pause for this long.
    Wait(Duration),
    /// Loop the body this many times.
    Repeat(u32),
    /// Loop terminator.
    End,
}

/// One parsed script line.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptCommand {
    /// Command keyword.
    pub opcode: Opcode,
    /// Operands exactly as written.
    pub operands: Operands,
    /// 1-based line in the script text.
    pub source_line: usize,
    instruction: Instruction,
}

impl ScriptCommand {
    /// Decoded operands.
    pub fn instruction(&self) -> Instruction {
        self.instruction
    }
}

/// A validated script.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Script {
    commands: Vec<ScriptCommand>,
}

impl Script {
    /// Commands in source order, `repeat`/`end` included.
    pub fn commands(&self) -> &[ScriptCommand] {
        &self.commands
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True for a script with only comments and blank lines.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Scale a speed percentage onto the locomotive's step range.
///
/// ```
/// use train_queue::script::speed_step;
///
/// assert_eq!(speed_step(0), 0);
/// assert_eq!(speed_step(100), 31);
/// assert_eq!(speed_step(-100), 31);
/// assert_eq!(speed_step(50), 16);
/// assert_eq!(speed_step(1), 0);
/// assert_eq!(speed_step(2), 1);
/// ```
pub fn speed_step(percent: i8) -> u8 {
    let magnitude = u32::from(percent.unsigned_abs().min(100));
    // round half up
    ((magnitude * u32::from(MAX_SPEED_STEP) + 50) / 100) as u8
}

// ============================================================================
// Parser
// ============================================================================

/// Parse and validate script text.
///
/// The first problem found is reported as [`ScriptError::Syntax`] with its
/// 1-based line number. Line validation happens before loop nesting is
/// checked.
pub fn parse_script(text: &str) -> Result<Script, ScriptError> {
    let mut commands = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        commands.push(parse_line(line, index + 1)?);
    }

    check_loops(&commands)?;
    Ok(Script { commands })
}

fn parse_line(line: &str, line_no: usize) -> Result<ScriptCommand, ScriptError> {
    let mut tokens = line.split_whitespace();
    let word = tokens.next().unwrap_or_default();
    let args: Vec<&str> = tokens.collect();

    let opcode = Opcode::from_word(word)
        .ok_or_else(|| ScriptError::syntax(line_no, format!("Unknown command '{word}'")))?;

    if args.len() != opcode.arity() {
        return Err(ScriptError::syntax(
            line_no,
            format!(
                "Command '{opcode}' expects {} argument(s), got {}",
                opcode.arity(),
                args.len()
            ),
        ));
    }

    let instruction = match opcode {
        Opcode::Speed => {
            let speed = args[0]
                .parse::<i8>()
                .ok()
                .filter(|s| (-100..=100).contains(s))
                .ok_or_else(|| {
                    ScriptError::syntax(
                        line_no,
                        format!("Speed must be integer -100 to 100, got '{}'", args[0]),
                    )
                })?;
            Instruction::Speed(speed)
        }
        Opcode::Forward => Instruction::Direction(DirectionCommand::Forward),
        Opcode::Reverse => Instruction::Direction(DirectionCommand::Reverse),
        Opcode::Toggle => Instruction::Direction(DirectionCommand::Toggle),
        Opcode::Horn => Instruction::Horn,
        Opcode::Bell => Instruction::Bell(parse_switch(opcode, args[0], line_no)?),
        Opcode::Lights => Instruction::Lights(parse_switch(opcode, args[0], line_no)?),
        Opcode::Wait => {
            let secs = args[0]
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| {
                    ScriptError::syntax(
                        line_no,
                        format!("Wait time must be a non-negative number, got '{}'", args[0]),
                    )
                })?;
            let duration = Duration::try_from_secs_f64(secs).map_err(|_| {
                ScriptError::syntax(line_no, format!("Wait time too large, got '{}'", args[0]))
            })?;
            Instruction::Wait(duration)
        }
        Opcode::Repeat => {
            let times = args[0]
                .parse::<u32>()
                .ok()
                .filter(|t| *t >= 1)
                .ok_or_else(|| {
                    ScriptError::syntax(
                        line_no,
                        format!("Repeat count must be positive integer, got '{}'", args[0]),
                    )
                })?;
            if !args[1].eq_ignore_ascii_case("times") {
                return Err(ScriptError::syntax(
                    line_no,
                    format!("Expected 'times' keyword, got '{}'", args[1]),
                ));
            }
            Instruction::Repeat(times)
        }
        Opcode::End => Instruction::End,
    };

    Ok(ScriptCommand {
        opcode,
        // arity already checked, never more than two
        operands: args.iter().map(|a| a.to_string()).collect(),
        source_line: line_no,
        instruction,
    })
}

fn parse_switch(opcode: Opcode, arg: &str, line_no: usize) -> Result<bool, ScriptError> {
    match arg.to_ascii_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => {
            let name = match opcode {
                Opcode::Bell => "Bell",
                _ => "Lights",
            };
            Err(ScriptError::syntax(
                line_no,
                format!("{name} argument must be 'on' or 'off', got '{arg}'"),
            ))
        }
    }
}

fn check_loops(commands: &[ScriptCommand]) -> Result<(), ScriptError> {
    let mut open = Vec::new();
    for cmd in commands {
        match cmd.opcode {
            Opcode::Repeat => open.push(cmd.source_line),
            Opcode::End => {
                if open.pop().is_none() {
                    return Err(ScriptError::syntax(
                        cmd.source_line,
                        "'end' without matching 'repeat'",
                    ));
                }
            }
            _ => {}
        }
    }
    match open.last() {
        Some(&line) => Err(ScriptError::syntax(line, "'repeat' without matching 'end'")),
        None => Ok(()),
    }
}

/// Index of the `end` matching the `repeat` at `repeat_idx`.
fn loop_end(commands: &[ScriptCommand], repeat_idx: usize) -> usize {
    let mut depth = 0usize;
    for (i, cmd) in commands.iter().enumerate().skip(repeat_idx) {
        match cmd.opcode {
            Opcode::Repeat => depth += 1,
            Opcode::End => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
    }
    commands.len()
}

// ============================================================================
// Interpreter
// ============================================================================

/// Summary of a finished run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExecutionReport {
    /// Primitive commands (not `repeat`/`end`) that completed, counting loop iterations.
    pub commands_executed: usize,
    /// Whether the run ended early because of [`ScriptInterpreter::stop`].
    pub stopped: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stopped,
}

type FlowFuture<'a> = Pin<Box<dyn Future<Output = Result<Flow, ScriptError>> + Send + 'a>>;

/// Runs scripts against a gateway, one at a time.
pub struct ScriptInterpreter<G> {
    gateway: Arc<G>,
    wait_slice: Duration,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

/// Clears the running flag even if the run is aborted mid-await.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<G: ActuatorGateway> ScriptInterpreter<G> {
    /// Interpreter with the default wait slice.
    pub fn new(gateway: Arc<G>) -> Self {
        Self::with_config(gateway, &ScriptConfig::default())
    }

    /// Interpreter with an explicit configuration.
    pub fn with_config(gateway: Arc<G>, config: &ScriptConfig) -> Self {
        Self {
            gateway,
            wait_slice: config.wait_slice(),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Whether a script is executing right now.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the running script to stop at the next check point.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        tracing::info!("script stop requested");
    }

    /// Parse and run `text`.
    ///
    /// Fails with [`ScriptError::AlreadyRunning`] if another run is active on
    /// this interpreter; nothing is parsed or sent in that case.
    pub async fn execute(&self, text: &str) -> Result<ExecutionReport, ScriptError> {
        let _guard = self.begin()?;
        let script = parse_script(text)?;
        self.run(&script).await
    }

    /// Run an already parsed script.
    pub async fn execute_parsed(&self, script: &Script) -> Result<ExecutionReport, ScriptError> {
        let _guard = self.begin()?;
        self.run(script).await
    }

    fn begin(&self) -> Result<RunningGuard<'_>, ScriptError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ScriptError::AlreadyRunning)?;
        self.stop_requested.store(false, Ordering::SeqCst);
        Ok(RunningGuard(&self.running))
    }

    async fn run(&self, script: &Script) -> Result<ExecutionReport, ScriptError> {
        tracing::info!(commands = script.len(), "script started");
        let mut executed = 0;
        let result = self
            .run_range(script.commands(), 0, script.len(), &mut executed)
            .await;

        match result {
            Ok(flow) => {
                let stopped = flow == Flow::Stopped;
                if stopped {
                    tracing::info!(executed, "script stopped");
                } else {
                    tracing::info!(executed, "script completed");
                }
                Ok(ExecutionReport {
                    commands_executed: executed,
                    stopped,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, executed, "script failed");
                Err(e)
            }
        }
    }

    fn should_stop(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn run_range<'a>(
        &'a self,
        commands: &'a [ScriptCommand],
        start: usize,
        end: usize,
        executed: &'a mut usize,
    ) -> FlowFuture<'a> {
        Box::pin(async move {
            let mut i = start;
            while i < end {
                if self.should_stop() {
                    return Ok(Flow::Stopped);
                }

                let cmd = &commands[i];
                match cmd.instruction {
                    Instruction::Repeat(times) => {
                        let body_end = loop_end(commands, i);
                        for _ in 0..times {
                            if self.should_stop() {
                                return Ok(Flow::Stopped);
                            }
                            let flow = self
                                .run_range(commands, i + 1, body_end, &mut *executed)
                                .await?;
                            if flow == Flow::Stopped {
                                return Ok(Flow::Stopped);
                            }
                        }
                        i = body_end;
                    }
                    Instruction::End => {}
                    _ => {
                        self.run_command(cmd).await?;
                        *executed += 1;
                    }
                }
                i += 1;
            }
            Ok(Flow::Continue)
        })
    }

    async fn run_command(&self, cmd: &ScriptCommand) -> Result<(), ScriptError> {
        tracing::debug!(line = cmd.source_line, opcode = %cmd.opcode, operands = ?cmd.operands, "executing");

        let gateway = &*self.gateway;
        let result = match cmd.instruction {
            Instruction::Speed(percent) => {
                if percent < 0 {
                    let flipped = gateway.set_direction(DirectionCommand::Reverse).await;
                    check(cmd, flipped)?;
                }
                gateway.set_speed(speed_step(percent)).await
            }
            Instruction::Direction(direction) => gateway.set_direction(direction).await,
            Instruction::Horn => gateway.blow_horn().await,
            Instruction::Bell(on) => gateway.ring_bell(on).await,
            Instruction::Lights(on) => gateway.set_lights(on).await,
            Instruction::Wait(duration) => {
                self.wait(duration).await;
                return Ok(());
            }
            Instruction::Repeat(_) | Instruction::End => return Ok(()),
        };
        check(cmd, result)
    }

    async fn wait(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() && !self.should_stop() {
            let started = Instant::now();
            tokio::time::sleep(self.wait_slice.min(remaining)).await;
            remaining = remaining.saturating_sub(started.elapsed());
        }
    }
}

fn check(cmd: &ScriptCommand, result: CommandResult) -> Result<(), ScriptError> {
    if result.success {
        Ok(())
    } else {
        Err(ScriptError::Device {
            line: cmd.source_line,
            opcode: cmd.opcode.as_str().to_string(),
            message: result.message,
        })
    }
}
