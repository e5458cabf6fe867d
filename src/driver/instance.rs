//! One driver bound to one argument set.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as channel;

use crate::driver::{Driver, DriverData, DriverFailure, DriverSettings, DriverType};
use crate::params::ArgumentSet;

type Extracted = (Box<dyn Driver>, Result<DriverData, DriverFailure>);
type Unwound = (Box<dyn Driver>, thread::Result<Result<DriverData, DriverFailure>>);

/// A driver bound to one [`ArgumentSet`], extracted at most once.
///
/// The first call to [`DriverInstance::extract`] does the work and caches the
/// result, success or failure; later calls return the cached result.
pub struct DriverInstance {
    name: Arc<str>,
    driver: Option<Box<dyn Driver>>,
    args: ArgumentSet,
    settings: DriverSettings,
    mandatory_args: Vec<String>,
    mandatory_settings: Vec<String>,
    timeout: Option<Duration>,
    catch_panics: bool,
    result: Option<Result<DriverData, DriverFailure>>,
    elapsed: Option<Duration>,
    overhead: Option<Duration>,
}

impl DriverInstance {
    pub(crate) fn new(
        driver_type: &DriverType,
        driver: Box<dyn Driver>,
        args: ArgumentSet,
        settings: DriverSettings,
    ) -> Self {
        Self {
            name: Arc::from(driver_type.name()),
            driver: Some(driver),
            args,
            settings,
            mandatory_args: driver_type.mandatory_args().to_vec(),
            mandatory_settings: driver_type.mandatory_settings().to_vec(),
            timeout: driver_type.timeout(),
            catch_panics: true,
            result: None,
            elapsed: None,
            overhead: None,
        }
    }

    /// Convert panics inside the driver into [`DriverFailure::Panicked`]
    /// (default) or let them unwind.
    #[must_use]
    pub fn catch_panics(mut self, enabled: bool) -> Self {
        self.catch_panics = enabled;
        self
    }

    /// Override the deadline inherited from the driver type.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn args(&self) -> &ArgumentSet {
        &self.args
    }

    /// Run the extraction once and return the (cached) result.
    pub fn extract(&mut self) -> Result<&DriverData, &DriverFailure> {
        let result = match self.result.take() {
            Some(done) => done,
            None => self.run_once(),
        };
        self.result.insert(result).as_ref()
    }

    /// Whether extraction has already happened.
    #[must_use]
    pub fn is_extracted(&self) -> bool {
        self.result.is_some()
    }

    /// Extracted data, if extraction ran and succeeded.
    #[must_use]
    pub fn data(&self) -> Option<&DriverData> {
        self.result.as_ref().and_then(|result| result.as_ref().ok())
    }

    /// Duration of the extraction step: the driver's own measurement when it
    /// reports one, otherwise wall time.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// Time spent around the extraction (validation, hooks, thread hand-off).
    #[must_use]
    pub fn overhead(&self) -> Option<Duration> {
        self.overhead
    }

    fn run_once(&mut self) -> Result<DriverData, DriverFailure> {
        let started = Instant::now();
        let result = self.validate().and_then(|()| self.run_driver());
        let total = started.elapsed();
        let elapsed = self.elapsed.unwrap_or(total);
        self.elapsed = Some(elapsed);
        self.overhead = Some(total.saturating_sub(elapsed));
        result
    }

    fn validate(&self) -> Result<(), DriverFailure> {
        if let Some(name) = self
            .mandatory_args
            .iter()
            .find(|name| !self.args.contains(name))
        {
            return Err(DriverFailure::MissingArg { name: name.clone() });
        }
        if let Some(name) = self
            .mandatory_settings
            .iter()
            .find(|name| !self.settings.contains(name))
        {
            return Err(DriverFailure::MissingSetting { name: name.clone() });
        }
        Ok(())
    }

    fn run_driver(&mut self) -> Result<DriverData, DriverFailure> {
        let Some(mut driver) = self.driver.take() else {
            return Err(DriverFailure::extraction("driver is no longer available"));
        };

        let started = Instant::now();
        let (driver, raw) = match self.timeout {
            Some(limit) if !driver.enforce_deadline(limit) => {
                match self.extract_with_deadline(driver, limit) {
                    Ok(done) => done,
                    Err(failure) => {
                        self.elapsed = Some(started.elapsed());
                        return Err(failure);
                    }
                }
            }
            _ => {
                let raw = guarded(self.catch_panics, driver_panicked, || {
                    driver.extract(&self.args, &self.settings)
                });
                (driver, raw)
            }
        };
        let wall = started.elapsed();
        self.elapsed = Some(driver.measured_duration().unwrap_or(wall));

        let mut driver = driver;
        let result = raw.and_then(|data| {
            guarded(self.catch_panics, driver_panicked, || post_process(driver.as_mut(), data))
        });
        self.driver = Some(driver);
        result
    }

    fn extract_with_deadline(
        &self,
        mut driver: Box<dyn Driver>,
        limit: Duration,
    ) -> Result<Extracted, DriverFailure> {
        let (tx, rx) = channel::bounded::<Unwound>(1);
        let args = self.args.clone();
        let settings = self.settings.clone();
        let spawned = thread::Builder::new()
            .name(format!("dfh-driver-{}", self.name))
            .spawn(move || {
                let raw =
                    panic::catch_unwind(AssertUnwindSafe(|| driver.extract(&args, &settings)));
                let _ = tx.send((driver, raw));
            });
        if let Err(err) = spawned {
            return Err(DriverFailure::extraction(format!(
                "could not start driver thread: {err}"
            )));
        }

        match rx.recv_timeout(limit) {
            Ok((driver, Ok(raw))) => Ok((driver, raw)),
            Ok((driver, Err(payload))) if self.catch_panics => {
                Ok((driver, Err(driver_panicked(panic_message(payload.as_ref())))))
            }
            // Re-raised on the caller's thread, as without a deadline.
            Ok((_, Err(payload))) => panic::resume_unwind(payload),
            // The worker is abandoned; its late result is dropped with the channel.
            Err(channel::RecvTimeoutError::Timeout) => Err(DriverFailure::timed_out(limit)),
            Err(channel::RecvTimeoutError::Disconnected) => Err(DriverFailure::Panicked {
                message: "driver thread exited without a result".to_string(),
            }),
        }
    }
}

fn post_process(driver: &mut dyn Driver, mut data: DriverData) -> Result<DriverData, DriverFailure> {
    driver
        .decode(&mut data)
        .map_err(|message| DriverFailure::Data {
            stage: "decode",
            message,
        })?;
    driver
        .normalize(&mut data)
        .map_err(|message| DriverFailure::Data {
            stage: "normalize",
            message,
        })?;
    driver.check(&data).map_err(|message| DriverFailure::Data {
        stage: "check",
        message,
    })?;
    data.retain(|key, _| !key.starts_with('_'));
    Ok(data)
}

/// Run `f`; when `catch` is set a panic is converted with `on_panic`.
pub(crate) fn guarded<T, E, F>(catch: bool, on_panic: fn(String) -> E, f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
{
    if !catch {
        return f();
    }
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(on_panic(panic_message(payload.as_ref()))))
}

fn driver_panicked(message: String) -> DriverFailure {
    DriverFailure::Panicked { message }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    impl Driver for Counting {
        fn extract(
            &mut self,
            args: &ArgumentSet,
            _settings: &DriverSettings,
        ) -> Result<DriverData, DriverFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let a = args.get("a").and_then(serde_json::Value::as_i64).unwrap_or(0);
            Ok(DriverData::from([
                ("sum".to_string(), json!(a + 1)),
                ("_raw".to_string(), json!("hidden")),
            ]))
        }

        fn check(&self, data: &DriverData) -> Result<(), String> {
            if data.contains_key("_raw") {
                Ok(())
            } else {
                Err("raw field should be visible to check".to_string())
            }
        }
    }

    struct Failing;

    impl Driver for Failing {
        fn extract(
            &mut self,
            _args: &ArgumentSet,
            _settings: &DriverSettings,
        ) -> Result<DriverData, DriverFailure> {
            Err(DriverFailure::extraction("connection refused"))
        }
    }

    struct Panicking;

    impl Driver for Panicking {
        fn extract(
            &mut self,
            _args: &ArgumentSet,
            _settings: &DriverSettings,
        ) -> Result<DriverData, DriverFailure> {
            panic!("calculator exploded");
        }
    }

    struct Sleepy;

    impl Driver for Sleepy {
        fn extract(
            &mut self,
            _args: &ArgumentSet,
            _settings: &DriverSettings,
        ) -> Result<DriverData, DriverFailure> {
            thread::sleep(Duration::from_millis(500));
            Ok(DriverData::new())
        }
    }

    struct SelfTimed;

    impl Driver for SelfTimed {
        fn extract(
            &mut self,
            _args: &ArgumentSet,
            _settings: &DriverSettings,
        ) -> Result<DriverData, DriverFailure> {
            Ok(DriverData::new())
        }

        fn measured_duration(&self) -> Option<Duration> {
            Some(Duration::from_millis(42))
        }
    }

    struct Enforcing {
        seen: Arc<parking_lot::Mutex<Option<(Duration, thread::ThreadId)>>>,
        limit: Option<Duration>,
    }

    impl Driver for Enforcing {
        fn extract(
            &mut self,
            _args: &ArgumentSet,
            _settings: &DriverSettings,
        ) -> Result<DriverData, DriverFailure> {
            let limit = self.limit.unwrap_or_default();
            *self.seen.lock() = Some((limit, thread::current().id()));
            Err(DriverFailure::timed_out(limit))
        }

        fn enforce_deadline(&mut self, limit: Duration) -> bool {
            self.limit = Some(limit);
            true
        }
    }

    fn args() -> ArgumentSet {
        [("a", json!(2))].into_iter().collect()
    }

    #[test]
    fn extraction_is_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let driver_type = DriverType::new("Counting", move || Counting {
            calls: Arc::clone(&counter),
        });
        let mut instance = driver_type.instantiate(args(), DriverSettings::new());
        assert!(!instance.is_extracted());
        let first = instance.extract().unwrap().clone();
        let second = instance.extract().unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(instance.elapsed().is_some());
    }

    #[test]
    fn hidden_fields_are_dropped_after_check() {
        let driver_type = DriverType::new("Counting", || Counting {
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let mut instance = driver_type.instantiate(args(), DriverSettings::new());
        let data = instance.extract().unwrap();
        assert_eq!(data.get("sum"), Some(&json!(3)));
        assert!(!data.contains_key("_raw"));
    }

    #[test]
    fn failures_are_memoized_too() {
        let mut instance =
            DriverType::new("Failing", || Failing).instantiate(args(), DriverSettings::new());
        let first = instance.extract().unwrap_err().clone();
        assert_eq!(first, DriverFailure::extraction("connection refused"));
        assert_eq!(instance.extract().unwrap_err(), &first);
        assert!(instance.data().is_none());
    }

    #[test]
    fn mandatory_args_and_settings_are_checked() {
        let missing_arg = DriverType::new("Failing", || Failing).with_mandatory_args(["op"]);
        let mut instance = missing_arg.instantiate(args(), DriverSettings::new());
        assert_eq!(
            instance.extract().unwrap_err(),
            &DriverFailure::MissingArg {
                name: "op".to_string()
            }
        );

        let missing_setting =
            DriverType::new("Failing", || Failing).with_mandatory_settings(["cmd"]);
        let mut instance = missing_setting.instantiate(args(), DriverSettings::new());
        assert_eq!(instance.extract().unwrap_err().kind(), "missing_setting");
    }

    #[test]
    fn panics_become_failures() {
        let mut instance =
            DriverType::new("Panicking", || Panicking).instantiate(args(), DriverSettings::new());
        match instance.extract() {
            Err(DriverFailure::Panicked { message }) => {
                assert!(message.contains("calculator exploded"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn deadline_abandons_slow_driver() {
        let driver_type =
            DriverType::new("Sleepy", || Sleepy).with_timeout(Duration::from_millis(20));
        let mut instance = driver_type.instantiate(args(), DriverSettings::new());
        assert_eq!(
            instance.extract().unwrap_err(),
            &DriverFailure::TimedOut { limit_ms: 20 }
        );
        assert!(instance.elapsed().unwrap() < Duration::from_millis(500));
    }

    #[test]
    fn deadline_passes_fast_driver_through() {
        let driver_type = DriverType::new("Counting", || Counting {
            calls: Arc::new(AtomicUsize::new(0)),
        })
        .with_timeout(Duration::from_secs(5));
        let mut instance = driver_type.instantiate(args(), DriverSettings::new());
        assert_eq!(instance.extract().unwrap().get("sum"), Some(&json!(3)));
    }

    #[test]
    fn self_measured_duration_wins() {
        let mut instance =
            DriverType::new("SelfTimed", || SelfTimed).instantiate(args(), DriverSettings::new());
        instance.extract().unwrap();
        assert_eq!(instance.elapsed(), Some(Duration::from_millis(42)));
    }

    #[test]
    #[should_panic(expected = "calculator exploded")]
    fn uncaught_panic_crosses_the_deadline_thread() {
        let driver_type =
            DriverType::new("Panicking", || Panicking).with_timeout(Duration::from_secs(5));
        let mut instance = driver_type
            .instantiate(args(), DriverSettings::new())
            .catch_panics(false);
        let _ = instance.extract();
    }

    #[test]
    fn self_enforcing_driver_runs_on_the_caller_thread() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let shared = Arc::clone(&seen);
        let driver_type = DriverType::new("Enforcing", move || Enforcing {
            seen: Arc::clone(&shared),
            limit: None,
        })
        .with_timeout(Duration::from_millis(250));
        let mut instance = driver_type.instantiate(args(), DriverSettings::new());
        assert_eq!(
            instance.extract().unwrap_err(),
            &DriverFailure::TimedOut { limit_ms: 250 }
        );
        assert_eq!(
            *seen.lock(),
            Some((Duration::from_millis(250), thread::current().id()))
        );
    }
}
