//! Virtual router lifecycle.
//!
//! [`VirtualRouter`] owns the QEMU process and runs the fixed sequence
//! `pre_start -> spawn -> post_start` / `pre_stop -> kill -> post_stop`.
//! What differs between router models lives behind [`VmVariant`].

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::config::VmConfig;
use super::process::{CommandRunner, RunningProcess};
use super::qemu;
use crate::error::{Error, Result, TelnetError, VmError};
use crate::telnet::{LogSink, TelnetConfig, TelnetConnection};

/// How long a stopping VM gets to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Host the QEMU telnet servers listen on.
const LOCALHOST: &str = "127.0.0.1";

/// What a router model adds to the common lifecycle.
///
/// Every hook defaults to a no-op.
pub trait VmVariant {
    /// Short model name, used in logs.
    fn name(&self) -> &str;

    /// Minimum number of serial consoles the model needs.
    fn serial_consoles(&self) -> usize {
        1
    }

    /// Full QEMU command line, program first.
    fn boot_args(&self, ctx: &VmContext<'_>) -> Vec<String> {
        qemu::base_args(ctx.config(), qemu::DEFAULT_NIC, qemu::kvm_available())
    }

    /// Runs before the VM process is started.
    fn pre_start(&mut self, _ctx: &VmContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs once the VM process is started, usually until the router is
    /// booted and configured.
    fn post_start(&mut self, _ctx: &VmContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs before the VM process is killed.
    fn pre_stop(&mut self, _ctx: &VmContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs after the VM process is gone.
    fn post_stop(&mut self, _ctx: &VmContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// What the lifecycle hooks get to work with.
pub struct VmContext<'a> {
    config: &'a VmConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> VmContext<'a> {
    /// Create a context.
    pub fn new(config: &'a VmConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    /// Get the VM configuration.
    pub fn config(&self) -> &VmConfig {
        self.config
    }

    /// Get the command runner.
    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner
    }

    /// Open a connection to the QEMU monitor.
    ///
    /// The caller owns the connection and is responsible for closing it.
    pub fn qemu_monitor(&self) -> Result<TelnetConnection> {
        debug!("Opening connection to qemu monitor");
        self.connect_with_retry("QEMU monitor", self.config.monitor_port)
    }

    /// Open a connection to serial console `index` (starting at zero).
    ///
    /// The caller owns the connection and is responsible for closing it.
    pub fn serial_console(&self, index: usize) -> Result<TelnetConnection> {
        let count = self.config.serial_console_count;
        if index >= count {
            return Err(VmError::InvalidSerialConsole { index, count }.into());
        }

        let port = u16::try_from(index)
            .ok()
            .and_then(|i| self.config.serial_base_port.checked_add(i))
            .ok_or(VmError::InvalidSerialConsole { index, count })?;

        debug!("Opening connection to serial console (index={})", index);
        self.connect_with_retry(&format!("serial console {}", index), port)
    }

    /// Retry refused connections; the telnet servers only appear once QEMU
    /// is up.
    fn connect_with_retry(&self, target: &str, port: u16) -> Result<TelnetConnection> {
        let attempts = self.config.connect_attempts.max(1);
        let sink = LogSink::new(format!("{}[{}]", target.replace(' ', "-"), port), log::Level::Debug);

        for attempt in 1..=attempts {
            let config = TelnetConfig::new(LOCALHOST, port).with_log_sink(sink.clone());
            let mut connection = TelnetConnection::new(config);

            match connection.open() {
                Ok(()) => {
                    debug!("Successfully connected to {}", target);
                    return Ok(connection);
                }
                Err(Error::Telnet(TelnetError::ConnectionFailed { source, .. })) => {
                    debug!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt, attempts, target, source
                    );
                }
                Err(e) => return Err(e),
            }

            if attempt < attempts {
                thread::sleep(self.config.connect_retry_delay);
            }
        }

        Err(VmError::ConnectRetriesExhausted {
            target: target.to_string(),
            attempts,
        }
        .into())
    }
}

impl std::fmt::Debug for VmContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmContext")
            .field("config", self.config)
            .finish_non_exhaustive()
    }
}

/// An emulated router: a VM process plus a model-specific setup.
#[derive(Debug)]
pub struct VirtualRouter<V: VmVariant, R: CommandRunner> {
    variant: V,
    config: VmConfig,
    runner: R,
    process: Option<Box<dyn RunningProcess>>,
}

impl<V: VmVariant, R: CommandRunner> VirtualRouter<V, R> {
    /// Create a stopped router.
    pub fn new(variant: V, mut config: VmConfig, runner: R) -> Self {
        config.serial_console_count = config.serial_console_count.max(variant.serial_consoles());
        Self {
            variant,
            config,
            runner,
            process: None,
        }
    }

    /// Whether the VM was started and not stopped since.
    pub fn is_started(&self) -> bool {
        self.process.is_some()
    }

    /// Get the configuration.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Get the model.
    pub fn variant(&self) -> &V {
        &self.variant
    }

    /// Start the VM and wait for the model's post-start setup.
    ///
    /// If the setup fails, the VM is stopped before the error is returned.
    pub fn start(&mut self) -> Result<()> {
        if self.is_started() {
            return Err(VmError::AlreadyStarted.into());
        }

        debug!("Ready to start {} VM", self.variant.name());
        let start = Instant::now();

        let ctx = VmContext::new(&self.config, &self.runner);
        debug!("Calling pre-start");
        self.variant.pre_start(&ctx)?;

        let args = self.variant.boot_args(&ctx);
        let (program, args) = args.split_first().ok_or(VmError::EmptyBootCommand)?;
        debug!("VM boot command: {} {}", program, args.join(" "));
        self.process = Some(self.runner.spawn(program, args)?);

        let ctx = VmContext::new(&self.config, &self.runner);
        debug!("Calling post-start");
        if let Err(e) = self.variant.post_start(&ctx) {
            warn!("Post-start failed, stopping the VM: {}", e);
            if let Err(stop) = self.stop() {
                warn!("Failed to stop the VM: {}", stop);
            }
            return Err(e);
        }

        info!("VM was successfully started in {:?}", start.elapsed());
        Ok(())
    }

    /// Stop the VM.
    ///
    /// Every step runs even if an earlier one fails; the first error is
    /// returned afterwards.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            return Err(VmError::NotStarted.into());
        };

        debug!("Ready to stop {} VM", self.variant.name());
        let start = Instant::now();

        let ctx = VmContext::new(&self.config, &self.runner);
        debug!("Calling pre-stop");
        let pre_stop = self.variant.pre_stop(&ctx);

        let kill = process.stop(STOP_TIMEOUT);
        if let Err(e) = &kill {
            warn!("Failed to kill the VM process {}: {}", process.id(), e);
        }

        debug!("Calling post-stop");
        let post_stop = self.variant.post_stop(&ctx);
        pre_stop.and(kill).and(post_stop)?;

        info!("VM was successfully shutdown in {:?}", start.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::net::TcpListener;
    use std::rc::Rc;

    use super::*;
    use crate::error::ConsoleError;
    use crate::vm::process::CommandOutput;

    type Journal = Rc<RefCell<Vec<String>>>;

    #[derive(Debug)]
    struct FakeProcess {
        journal: Journal,
    }

    impl RunningProcess for FakeProcess {
        fn id(&self) -> u32 {
            42
        }

        fn stop(&mut self, _timeout: Duration) -> Result<()> {
            self.journal.borrow_mut().push("kill".into());
            Ok(())
        }
    }

    struct FakeRunner {
        journal: Journal,
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, program: &str, _args: &[String]) -> Result<CommandOutput> {
            self.journal.borrow_mut().push(format!("run {}", program));
            Ok(CommandOutput::default())
        }

        fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn RunningProcess>> {
            self.journal
                .borrow_mut()
                .push(format!("spawn {} {}", program, args.join(" ")));
            Ok(Box::new(FakeProcess {
                journal: self.journal.clone(),
            }))
        }
    }

    struct Recorder {
        journal: Journal,
        fail_post_start: bool,
    }

    impl VmVariant for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn serial_consoles(&self) -> usize {
            4
        }

        fn boot_args(&self, _ctx: &VmContext<'_>) -> Vec<String> {
            vec!["qemu".into(), "-m".into(), "1024".into()]
        }

        fn pre_start(&mut self, _ctx: &VmContext<'_>) -> Result<()> {
            self.journal.borrow_mut().push("pre_start".into());
            Ok(())
        }

        fn post_start(&mut self, _ctx: &VmContext<'_>) -> Result<()> {
            self.journal.borrow_mut().push("post_start".into());
            if self.fail_post_start {
                return Err(ConsoleError::AuthenticationFailed { user: "admin".into() }.into());
            }
            Ok(())
        }

        fn pre_stop(&mut self, _ctx: &VmContext<'_>) -> Result<()> {
            self.journal.borrow_mut().push("pre_stop".into());
            Ok(())
        }

        fn post_stop(&mut self, _ctx: &VmContext<'_>) -> Result<()> {
            self.journal.borrow_mut().push("post_stop".into());
            Ok(())
        }
    }

    fn router(fail_post_start: bool) -> (Journal, VirtualRouter<Recorder, FakeRunner>) {
        let journal = Journal::default();
        let variant = Recorder {
            journal: journal.clone(),
            fail_post_start,
        };
        let runner = FakeRunner {
            journal: journal.clone(),
        };
        (journal.clone(), VirtualRouter::new(variant, VmConfig::default(), runner))
    }

    #[test]
    fn test_lifecycle_order() {
        let (journal, mut router) = router(false);
        assert_eq!(router.variant().name(), "recorder");
        assert_eq!(router.config().serial_console_count, 4);

        router.start().unwrap();
        assert!(router.is_started());
        assert!(matches!(router.start(), Err(Error::Vm(VmError::AlreadyStarted))));

        router.stop().unwrap();
        assert!(!router.is_started());
        assert!(matches!(router.stop(), Err(Error::Vm(VmError::NotStarted))));

        assert_eq!(
            *journal.borrow(),
            vec![
                "pre_start",
                "spawn qemu -m 1024",
                "post_start",
                "pre_stop",
                "kill",
                "post_stop"
            ]
        );
    }

    #[test]
    fn test_post_start_failure_stops_vm() {
        let (journal, mut router) = router(true);

        let err = router.start().unwrap_err();
        assert!(matches!(
            err,
            Error::Console(ConsoleError::AuthenticationFailed { .. })
        ));
        assert!(!router.is_started());
        assert_eq!(
            *journal.borrow(),
            vec![
                "pre_start",
                "spawn qemu -m 1024",
                "post_start",
                "pre_stop",
                "kill",
                "post_stop"
            ]
        );
    }

    #[derive(Debug)]
    struct StuckProcess {
        journal: Journal,
    }

    impl RunningProcess for StuckProcess {
        fn id(&self) -> u32 {
            43
        }

        fn stop(&mut self, _timeout: Duration) -> Result<()> {
            self.journal.borrow_mut().push("kill failed".into());
            Err(VmError::Io(std::io::Error::other("process did not exit")).into())
        }
    }

    #[test]
    fn test_post_stop_runs_when_kill_fails() {
        let (journal, mut router) = router(false);
        router.process = Some(Box::new(StuckProcess {
            journal: journal.clone(),
        }));

        let err = router.stop().unwrap_err();
        assert!(matches!(err, Error::Vm(VmError::Io(_))));
        assert!(!router.is_started());
        assert_eq!(
            *journal.borrow(),
            vec!["pre_stop", "kill failed", "post_stop"]
        );
    }

    fn config_for(port: u16) -> VmConfig {
        VmConfig {
            monitor_port: port,
            serial_base_port: port,
            serial_console_count: 1,
            connect_attempts: 2,
            connect_retry_delay: Duration::from_millis(10),
            ..VmConfig::default()
        }
    }

    #[test]
    fn test_serial_console_index_out_of_range() {
        let config = config_for(5000);
        let runner = FakeRunner {
            journal: Journal::default(),
        };
        let ctx = VmContext::new(&config, &runner);
        assert!(matches!(
            ctx.serial_console(1),
            Err(Error::Vm(VmError::InvalidSerialConsole { index: 1, count: 1 }))
        ));
    }

    #[test]
    fn test_connect_retries_exhausted() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = config_for(port);
        let runner = FakeRunner {
            journal: Journal::default(),
        };
        let ctx = VmContext::new(&config, &runner);
        assert!(matches!(
            ctx.qemu_monitor(),
            Err(Error::Vm(VmError::ConnectRetriesExhausted { attempts: 2, .. }))
        ));
    }

    #[test]
    fn test_serial_console_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || listener.accept().map(|(peer, _)| peer));

        let config = config_for(port);
        let runner = FakeRunner {
            journal: Journal::default(),
        };
        let ctx = VmContext::new(&config, &runner);
        let mut console = ctx.serial_console(0).unwrap();
        assert!(console.is_open());

        let _peer = server.join().unwrap().unwrap();
        console.close().unwrap();
    }
}
