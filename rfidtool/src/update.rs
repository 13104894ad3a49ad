//! Paginated firmware update.
//!
//! ```text
//! Entering -> Transferring(page) -> Finalizing -> Verifying(attempt)
//!                                                -> Succeeded | Failed
//! ```
//!
//! Every wait is bounded. Pause, cancel and restart are cooperative requests
//! on an [`UpdateControl`], polled between scans and at the top of each page.

use {
    crate::{
        cycle::sleep_cancellable,
        error::{Error, Result},
        is_interrupted_requested,
        link::Link,
        protocol::{
            Command, CommandFrame, ErrorCode, PAGE_SIZE, Packet, PacketTracker, Response,
        },
    },
    log::{debug, info, trace, warn},
    std::{
        fmt,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::{Duration, Instant},
    },
};

/// Bounded waits of the update sequence.
#[derive(Debug, Clone)]
pub struct UpdateTiming {
    /// Wait for the F0H answer before transferring anyway.
    pub enter_wait: Duration,
    /// Wait for each page acknowledgment.
    pub page_timeout: Duration,
    /// Wait for the F2H answer.
    pub finalize_timeout: Duration,
    /// Delay after finalize while the reader reboots.
    pub settle_delay: Duration,
    /// Wait for each version answer.
    pub verify_timeout: Duration,
    /// Version queries before giving up.
    pub verify_attempts: u32,
    /// Buffer re-scan interval.
    pub poll_interval: Duration,
}

impl Default for UpdateTiming {
    fn default() -> Self {
        Self {
            enter_wait: Duration::from_secs(2),
            page_timeout: Duration::from_secs(3),
            finalize_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_secs(3),
            verify_timeout: Duration::from_secs(2),
            verify_attempts: 3,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Shared pause/cancel/restart requests for a running update.
///
/// Clones share the same flags, so a UI thread can steer an update running
/// elsewhere.
#[derive(Debug, Clone, Default)]
pub struct UpdateControl {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    restart: Arc<AtomicBool>,
}

impl UpdateControl {
    /// Fresh control with no requests pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the transfer before the next page.
    pub fn request_pause(&self) {
        self.paused
            .store(true, Ordering::SeqCst);
    }

    /// Continue a paused transfer.
    pub fn request_resume(&self) {
        self.paused
            .store(false, Ordering::SeqCst);
    }

    /// Stop the update; it ends as aborted.
    pub fn request_cancel(&self) {
        self.cancelled
            .store(true, Ordering::SeqCst);
    }

    /// Drop the current transfer and start again from the enter handshake.
    pub fn request_restart(&self) {
        self.restart
            .store(true, Ordering::SeqCst);
    }

    /// Whether a pause is requested.
    pub fn is_paused(&self) -> bool {
        self.paused
            .load(Ordering::SeqCst)
    }

    /// Whether the update should stop, by request or by interrupt.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
            .load(Ordering::SeqCst)
            || is_interrupted_requested()
    }

    /// Whether a restart is pending.
    pub fn restart_requested(&self) -> bool {
        self.restart
            .load(Ordering::SeqCst)
    }

    fn clear_restart(&self) {
        self.restart
            .store(false, Ordering::SeqCst);
        self.paused
            .store(false, Ordering::SeqCst);
    }
}

/// Current state of the update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    /// Waiting for the reader to enter update mode.
    Entering,
    /// Sending page `page` (0-based) of `total`.
    Transferring {
        /// Page being sent.
        page: usize,
        /// Page count.
        total: usize,
    },
    /// Waiting for the reader to accept the image.
    Finalizing,
    /// Querying the new version.
    Verifying {
        /// 1-based attempt.
        attempt: u32,
    },
    /// Finished and verified.
    Succeeded,
    /// Stopped by a failure.
    Failed,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entering => write!(f, "entering update mode"),
            Self::Transferring { page, total } => {
                write!(f, "transferring page {}/{total}", page + 1)
            },
            Self::Finalizing => write!(f, "finalizing"),
            Self::Verifying { attempt } => write!(f, "verifying (attempt {attempt})"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// Entered a new phase.
    Phase(UpdatePhase),
    /// `page` pages of `total` are acknowledged.
    PageConfirmed {
        /// Confirmed page count.
        page: usize,
        /// Page count.
        total: usize,
    },
    /// Holding before page `page`.
    Paused {
        /// Next page to send.
        page: usize,
    },
    /// Continuing with page `page`.
    Resumed {
        /// Next page to send.
        page: usize,
    },
    /// Starting over from the enter handshake.
    Restarting,
}

impl UpdateEvent {
    /// Transfer progress in `0.0..=1.0` for a page confirmation.
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self {
            Self::PageConfirmed { page, total } if *total > 0 => {
                Some(*page as f64 / *total as f64)
            },
            _ => None,
        }
    }
}

/// Why an update failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateFailure {
    /// No OK acknowledgment for a page before its timeout.
    #[error("page {page} was not acknowledged")]
    PageNotAcknowledged {
        /// 0-based page index.
        page: usize,
        /// Code of the last matching but rejected acknowledgment.
        last_code: Option<ErrorCode>,
    },
    /// The reader refused the image.
    #[error("finalize rejected with {code}: {message}")]
    FinalizeRejected {
        /// Reported code.
        code: ErrorCode,
        /// Resolved message.
        message: String,
    },
    /// No answer to the finalize request.
    #[error("no response to finalize request")]
    FinalizeTimeout,
    /// No version string after reboot.
    #[error("no version reported after {attempts} attempts")]
    VersionUnavailable {
        /// Queries sent.
        attempts: u32,
    },
    /// The reader runs a different version than expected.
    #[error("version mismatch: expected {expected}, reader reports {actual}")]
    VersionMismatch {
        /// Expected version.
        expected: String,
        /// Reported version.
        actual: String,
    },
    /// Nothing to send.
    #[error("firmware image is empty")]
    EmptyImage,
}

/// Final result of an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Image accepted and the reader reports `version`.
    Succeeded {
        /// Version reported after reboot.
        version: String,
    },
    /// Stopped by a failure.
    Failed(UpdateFailure),
    /// Stopped by a cancel request.
    Aborted,
}

/// Summary of an update run.
#[derive(Debug, Clone)]
pub struct UpdateReport {
    /// How the run ended.
    pub outcome: UpdateOutcome,
    /// Pages in the image.
    pub total_pages: usize,
    /// Pages acknowledged in the last attempt.
    pub confirmed_pages: usize,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl UpdateReport {
    /// Whether the update succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, UpdateOutcome::Succeeded { .. })
    }
}

/// Split `image` into [`PAGE_SIZE`] pages, zero-padding the last one.
pub fn split_pages(image: &[u8]) -> Vec<Vec<u8>> {
    image
        .chunks(PAGE_SIZE)
        .map(|chunk| {
            let mut page = chunk.to_vec();
            page.resize(PAGE_SIZE, 0x00);
            page
        })
        .collect()
}

/// Whether an acknowledgment echoing `echoed` confirms page `current`.
///
/// Readers echo either the current counter or the previous one.
pub fn page_matches(echoed: u16, current: u16) -> bool {
    echoed == current || current.checked_sub(1) == Some(echoed)
}

fn normalize_version(version: &str) -> String {
    let lower = version
        .trim()
        .to_lowercase();
    lower
        .strip_prefix('v')
        .map_or_else(|| lower.clone(), str::to_string)
}

/// Compare two version strings, ignoring case and a leading `v`.
pub fn versions_match(expected: &str, actual: &str) -> bool {
    normalize_version(expected) == normalize_version(actual)
}

/// Control flow out of one phase.
enum Flow<T> {
    Next(T),
    Stop(UpdateOutcome),
    Restart,
}

/// Result of a bounded wait.
enum Wait<T> {
    Got(T),
    TimedOut,
    Cancelled,
}

/// Drives one firmware update over a link.
pub struct FirmwareUpdater<'a, L: Link + ?Sized> {
    link: &'a mut L,
    device_id: u8,
    timing: UpdateTiming,
    control: UpdateControl,
    confirmed: usize,
}

impl<'a, L: Link + ?Sized> FirmwareUpdater<'a, L> {
    /// Updater for reader `device_id` with default timing.
    pub fn new(link: &'a mut L, device_id: u8) -> Self {
        Self {
            link,
            device_id,
            timing: UpdateTiming::default(),
            control: UpdateControl::new(),
            confirmed: 0,
        }
    }

    /// Set the timing.
    #[must_use]
    pub fn with_timing(mut self, timing: UpdateTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Use an external control handle.
    #[must_use]
    pub fn with_control(mut self, control: UpdateControl) -> Self {
        self.control = control;
        self
    }

    /// Control handle steering this updater.
    pub fn control(&self) -> &UpdateControl {
        &self.control
    }

    /// Run the full sequence.
    ///
    /// When `expected_version` is given, the version reported after reboot
    /// must match it. Only transport faults are errors.
    pub fn run<F>(
        &mut self,
        image: &[u8],
        expected_version: Option<&str>,
        mut on_event: F,
    ) -> Result<UpdateReport>
    where
        F: FnMut(&UpdateEvent),
    {
        let started = Instant::now();
        let pages = split_pages(image);
        self.confirmed = 0;

        let outcome = if pages.is_empty() {
            UpdateOutcome::Failed(UpdateFailure::EmptyImage)
        } else {
            info!(
                "Updating reader {}: {} bytes in {} pages",
                self.device_id,
                image.len(),
                pages.len()
            );
            loop {
                match self.attempt(&pages, expected_version, &mut on_event)? {
                    Flow::Next(outcome) | Flow::Stop(outcome) => break outcome,
                    Flow::Restart => {
                        info!("Restarting update from the enter handshake");
                        self.control.clear_restart();
                        self.confirmed = 0;
                        on_event(&UpdateEvent::Restarting);
                    },
                }
            }
        };

        match &outcome {
            UpdateOutcome::Succeeded { version } => {
                info!("Update complete, reader reports {version}");
                on_event(&UpdateEvent::Phase(UpdatePhase::Succeeded));
            },
            UpdateOutcome::Failed(failure) => {
                warn!("Update failed: {failure}");
                on_event(&UpdateEvent::Phase(UpdatePhase::Failed));
            },
            UpdateOutcome::Aborted => info!("Update aborted"),
        }

        Ok(UpdateReport {
            outcome,
            total_pages: pages.len(),
            confirmed_pages: self.confirmed,
            elapsed: started.elapsed(),
        })
    }

    fn attempt<F>(
        &mut self,
        pages: &[Vec<u8>],
        expected_version: Option<&str>,
        on_event: &mut F,
    ) -> Result<Flow<UpdateOutcome>>
    where
        F: FnMut(&UpdateEvent),
    {
        if let Flow::Stop(outcome) = self.enter(on_event)? {
            return Ok(Flow::Stop(outcome));
        }

        match self.transfer(pages, on_event)? {
            Flow::Next(()) => {},
            Flow::Stop(outcome) => return Ok(Flow::Stop(outcome)),
            Flow::Restart => return Ok(Flow::Restart),
        }

        if let Flow::Stop(outcome) = self.finalize(on_event)? {
            return Ok(Flow::Stop(outcome));
        }

        let version = match self.verify(on_event)? {
            Flow::Next(version) => version,
            Flow::Stop(outcome) => return Ok(Flow::Stop(outcome)),
            Flow::Restart => return Ok(Flow::Restart),
        };

        let outcome = match expected_version {
            Some(expected) if !versions_match(expected, &version) => {
                UpdateOutcome::Failed(UpdateFailure::VersionMismatch {
                    expected: expected.to_string(),
                    actual: version,
                })
            },
            _ => UpdateOutcome::Succeeded { version },
        };
        Ok(Flow::Next(outcome))
    }

    fn enter<F: FnMut(&UpdateEvent)>(&mut self, on_event: &mut F) -> Result<Flow<()>> {
        if self.control.is_cancelled() {
            return Ok(Flow::Stop(UpdateOutcome::Aborted));
        }

        on_event(&UpdateEvent::Phase(UpdatePhase::Entering));
        info!("Entering update mode");

        let mut tracker = PacketTracker::new();
        self.link.reset_buffer();
        self.send(&CommandFrame::enter_update(self.device_id))?;

        let entered = self.wait_for(
            &mut tracker,
            Command::EnterUpdate,
            self.timing.enter_wait,
            |packet| matches!(packet.response, Response::UpdateEntered).then_some(()),
        )?;

        Ok(match entered {
            Wait::Got(()) => {
                debug!("Reader acknowledged update mode");
                Flow::Next(())
            },
            Wait::TimedOut => {
                warn!("No F0H response, continuing with transfer");
                Flow::Next(())
            },
            Wait::Cancelled => Flow::Stop(UpdateOutcome::Aborted),
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn transfer<F: FnMut(&UpdateEvent)>(
        &mut self,
        pages: &[Vec<u8>],
        on_event: &mut F,
    ) -> Result<Flow<()>> {
        let total = pages.len();

        for (index, page) in pages.iter().enumerate() {
            if self.control.is_cancelled() {
                return Ok(Flow::Stop(UpdateOutcome::Aborted));
            }
            if self.control.restart_requested() {
                return Ok(Flow::Restart);
            }
            if self.control.is_paused() {
                if let Some(flow) = self.hold(index, on_event) {
                    return Ok(flow);
                }
            }

            on_event(&UpdateEvent::Phase(UpdatePhase::Transferring { page: index, total }));

            // Counter wraps past 65535 pages
            let counter = index as u16;
            let mut tracker = PacketTracker::new();
            self.link.reset_buffer();
            self.send(&CommandFrame::update_page(self.device_id, counter, page))?;

            let mut last_code = None;
            let acked = self.wait_for(
                &mut tracker,
                Command::UpdatePage,
                self.timing.page_timeout,
                |packet| match packet.response {
                    Response::PageAck { page, error } if page_matches(page, counter) => {
                        if error.is_ok() {
                            Some(())
                        } else {
                            warn!("Page {counter} rejected with {error}");
                            last_code = Some(error);
                            None
                        }
                    },
                    Response::PageAck { page, .. } => {
                        debug!("Ignoring ack for page {page} while sending {counter}");
                        None
                    },
                    _ => None,
                },
            )?;

            match acked {
                Wait::Got(()) => {
                    self.confirmed = index + 1;
                    on_event(&UpdateEvent::PageConfirmed {
                        page: index + 1,
                        total,
                    });
                },
                Wait::TimedOut => {
                    return Ok(Flow::Stop(UpdateOutcome::Failed(
                        UpdateFailure::PageNotAcknowledged {
                            page: index,
                            last_code,
                        },
                    )));
                },
                Wait::Cancelled => return Ok(Flow::Stop(UpdateOutcome::Aborted)),
            }
        }

        Ok(Flow::Next(()))
    }

    /// Idle before page `index` until resumed, cancelled or restarted.
    fn hold<F: FnMut(&UpdateEvent)>(&self, index: usize, on_event: &mut F) -> Option<Flow<()>> {
        info!("Paused before page {index}");
        on_event(&UpdateEvent::Paused { page: index });

        while self.control.is_paused() {
            if self.control.is_cancelled() {
                return Some(Flow::Stop(UpdateOutcome::Aborted));
            }
            if self.control.restart_requested() {
                return Some(Flow::Restart);
            }
            thread::sleep(self.timing.poll_interval);
        }

        info!("Resumed at page {index}");
        on_event(&UpdateEvent::Resumed { page: index });
        None
    }

    fn finalize<F: FnMut(&UpdateEvent)>(&mut self, on_event: &mut F) -> Result<Flow<()>> {
        on_event(&UpdateEvent::Phase(UpdatePhase::Finalizing));
        info!("Finalizing update");

        let mut tracker = PacketTracker::new();
        self.link.reset_buffer();
        self.send(&CommandFrame::finish_update(self.device_id))?;

        let finished = self.wait_for(
            &mut tracker,
            Command::FinishUpdate,
            self.timing.finalize_timeout,
            |packet| match packet.response {
                Response::UpdateFinished { error } => Some(error),
                _ => None,
            },
        )?;

        Ok(match finished {
            Wait::Got(code) if code.is_ok() => Flow::Next(()),
            Wait::Got(code) => Flow::Stop(UpdateOutcome::Failed(UpdateFailure::FinalizeRejected {
                code,
                message: code.message(),
            })),
            Wait::TimedOut => Flow::Stop(UpdateOutcome::Failed(UpdateFailure::FinalizeTimeout)),
            Wait::Cancelled => Flow::Stop(UpdateOutcome::Aborted),
        })
    }

    fn verify<F: FnMut(&UpdateEvent)>(&mut self, on_event: &mut F) -> Result<Flow<String>> {
        debug!(
            "Waiting {} ms for reader reboot",
            self.timing.settle_delay.as_millis()
        );
        let control = self.control.clone();
        if !sleep_cancellable(
            self.timing.settle_delay,
            self.timing.poll_interval,
            &|| control.is_cancelled(),
        ) {
            return Ok(Flow::Stop(UpdateOutcome::Aborted));
        }

        let attempts = self.timing.verify_attempts;
        for attempt in 1..=attempts {
            on_event(&UpdateEvent::Phase(UpdatePhase::Verifying { attempt }));

            let mut tracker = PacketTracker::new();
            self.link.reset_buffer();
            self.send(&CommandFrame::read_version(self.device_id))?;

            let reported = self.wait_for(
                &mut tracker,
                Command::ReadVersion,
                self.timing.verify_timeout,
                |packet| match packet.response {
                    Response::Version { version, .. } if !version.is_empty() => Some(version),
                    _ => None,
                },
            )?;

            match reported {
                Wait::Got(version) => return Ok(Flow::Next(version)),
                Wait::TimedOut => warn!("No version on attempt {attempt}/{attempts}"),
                Wait::Cancelled => return Ok(Flow::Stop(UpdateOutcome::Aborted)),
            }
        }

        Ok(Flow::Stop(UpdateOutcome::Failed(
            UpdateFailure::VersionUnavailable { attempts },
        )))
    }

    fn send(&mut self, frame: &CommandFrame) -> Result<()> {
        debug!("Sending {}", frame.command());
        self.link
            .send(&frame.build())
    }

    /// Poll until `accept` takes a packet, the timeout passes or a cancel
    /// request arrives.
    fn wait_for<T>(
        &self,
        tracker: &mut PacketTracker,
        command: Command,
        timeout: Duration,
        mut accept: impl FnMut(Packet) -> Option<T>,
    ) -> Result<Wait<T>> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.link.is_connected() {
                return Err(Error::Disconnected);
            }
            for packet in tracker.fresh(&self.link.snapshot(), command) {
                trace!("{command}: {:?}", packet.response);
                if let Some(value) = accept(packet) {
                    return Ok(Wait::Got(value));
                }
            }
            if self.control.is_cancelled() {
                return Ok(Wait::Cancelled);
            }
            if Instant::now() >= deadline {
                return Ok(Wait::TimedOut);
            }
            thread::sleep(self.timing.poll_interval);
        }
    }
}

/// Run an update with default timing.
pub fn run_firmware_update<L, F>(
    link: &mut L,
    image: &[u8],
    device_id: u8,
    expected_version: Option<&str>,
    control: &UpdateControl,
    on_event: F,
) -> Result<UpdateReport>
where
    L: Link + ?Sized,
    F: FnMut(&UpdateEvent),
{
    FirmwareUpdater::new(link, device_id)
        .with_control(control.clone())
        .run(image, expected_version, on_event)
}
