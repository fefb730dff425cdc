//! gifplay - headless animated GIF player

use anyhow::{Context, Result};
use gifplay::encoder::{EncodeQuality, EncodeSession};
use gifplay::error::SessionError;
use gifplay::request::{
    FrameTarget, FrameView, PlaybackOptions, PlaybackRequest, PlaybackSource, Request, RequestTracker,
};
use parking_lot::Mutex;
use smol::channel::{unbounded, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const USAGE: &str = "usage: gifplay [--loops N] [--fast] [--dump DIR] [--reencode DIR] <file|url>...";

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse(std::env::args().skip(1))?;
    if args.inputs.is_empty() {
        println!("{}", USAGE);
        return Ok(());
    }

    for dir in [&args.dump_dir, &args.reencode_dir].into_iter().flatten() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {:?}", dir))?;
    }

    let (events, receiver) = unbounded();
    let mut tracker = RequestTracker::new();
    let mut requests: Vec<Arc<dyn Request>> = Vec::new();
    let mut failures = 0usize;

    for (i, input) in args.inputs.iter().enumerate() {
        let source = match load_input(input) {
            Ok(source) => source,
            Err(e) => {
                log::error!("Skipping {}: {:#}", input, e);
                failures += 1;
                continue;
            }
        };

        let name = format!("{:02}_{}", i, input_stem(input));
        let target = Arc::new(CliTarget {
            reencode_path: args.reencode_dir.as_ref().map(|dir| dir.join(format!("{}.gif", name))),
            dump_dir: args.dump_dir.clone(),
            name,
            encoder: Mutex::new(None),
            frames: AtomicU64::new(0),
            events: events.clone(),
        });

        let request: Arc<dyn Request> = Arc::new(PlaybackRequest::new(source, target, args.options));
        tracker.run_request(Arc::clone(&request));
        requests.push(request);
    }
    drop(events);

    log::info!("Playing {} animation(s)", requests.len());

    let mut remaining = requests.len();
    smol::block_on(async {
        while remaining > 0 {
            match receiver.recv().await {
                Ok(PlayerEvent::Finished { name, frames }) => {
                    println!("{}: {} frames shown", name, frames);
                }
                Ok(PlayerEvent::Failed { name, error }) => {
                    eprintln!("{}: {}", name, error);
                    failures += 1;
                }
                Err(_) => break,
            }
            remaining -= 1;
        }
    });

    tracker.destroy_requests();

    if failures > 0 {
        anyhow::bail!("{} of {} input(s) failed", failures, args.inputs.len());
    }
    Ok(())
}

struct Args {
    inputs: Vec<String>,
    options: PlaybackOptions,
    dump_dir: Option<PathBuf>,
    reencode_dir: Option<PathBuf>,
}

impl Args {
    fn parse(mut raw: impl Iterator<Item = String>) -> Result<Self> {
        let mut args = Args {
            inputs: Vec::new(),
            options: PlaybackOptions::default(),
            dump_dir: None,
            reencode_dir: None,
        };

        while let Some(arg) = raw.next() {
            match arg.as_str() {
                "--loops" => {
                    let value = raw.next().context("--loops needs a value")?;
                    args.options.loops = value
                        .parse()
                        .with_context(|| format!("invalid loop count {:?}", value))?;
                }
                "--fast" => args.options.realtime = false,
                "--dump" => {
                    args.dump_dir = Some(raw.next().context("--dump needs a directory")?.into());
                }
                "--reencode" => {
                    args.reencode_dir = Some(raw.next().context("--reencode needs a directory")?.into());
                }
                "-h" | "--help" => {
                    args.inputs.clear();
                    return Ok(args);
                }
                flag if flag.starts_with("--") => anyhow::bail!("unknown option {}\n{}", flag, USAGE),
                _ => args.inputs.push(arg),
            }
        }

        Ok(args)
    }
}

/// Read a path as-is, or download a URL into memory
fn load_input(input: &str) -> Result<PlaybackSource> {
    if !(input.starts_with("http://") || input.starts_with("https://")) {
        return Ok(PlaybackSource::Path(PathBuf::from(input)));
    }

    log::info!("Downloading from URL: {}", input);
    let response = reqwest::blocking::get(input)?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP error: {}", response.status());
    }
    let bytes = response.bytes()?;
    log::info!("Downloaded {} bytes", bytes.len());

    Ok(PlaybackSource::from(bytes.to_vec()))
}

fn input_stem(input: &str) -> String {
    let last = input.rsplit('/').next().unwrap_or(input);
    Path::new(last)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "download".to_string())
}

enum PlayerEvent {
    Finished { name: String, frames: u64 },
    Failed { name: String, error: String },
}

/// Logs frames and optionally dumps them as PNG or re-encodes the first pass
struct CliTarget {
    name: String,
    dump_dir: Option<PathBuf>,
    reencode_path: Option<PathBuf>,
    encoder: Mutex<Option<EncodeSession>>,
    frames: AtomicU64,
    events: Sender<PlayerEvent>,
}

impl CliTarget {
    fn reencode(&self, path: &Path, frame: &FrameView<'_>) {
        let mut encoder = self.encoder.lock();
        if encoder.is_none() {
            let (width, height) = frame.pixels.dimensions();
            match EncodeSession::create(path, width, height, EncodeQuality::default()) {
                Ok(session) => *encoder = Some(session),
                Err(e) => {
                    log::warn!("{}: cannot re-encode: {}", self.name, e);
                    return;
                }
            }
        }

        if let Some(session) = encoder.as_mut() {
            if session.is_closed() || session.frames_written() >= frame.frame_count as u64 {
                return;
            }
            if let Err(e) = session.encode_frame(frame.pixels, frame.delay_ms) {
                log::warn!("{}: re-encode failed: {}", self.name, e);
            }
        }
    }
}

impl FrameTarget for CliTarget {
    fn on_frame(&self, frame: &FrameView<'_>) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "{}: frame {}/{} ({}ms)",
            self.name,
            frame.index + 1,
            frame.frame_count,
            frame.delay_ms
        );

        if let Some(dir) = &self.dump_dir {
            let path = dir.join(format!("{}_{:04}.png", self.name, frame.index));
            if let Err(e) = frame.pixels.save(&path) {
                log::warn!("Failed to write {:?}: {}", path, e);
            }
        }

        if let Some(path) = &self.reencode_path {
            self.reencode(path, frame);
        }
    }

    fn on_complete(&self) {
        if let Some(mut session) = self.encoder.lock().take() {
            if let Err(e) = session.close() {
                log::error!("{}: writing {:?} failed: {}", self.name, session.path(), e);
                let _ = self.events.send_blocking(PlayerEvent::Failed {
                    name: self.name.clone(),
                    error: format!("re-encode failed: {}", e),
                });
                return;
            }
        }
        let _ = self.events.send_blocking(PlayerEvent::Finished {
            name: self.name.clone(),
            frames: self.frames.load(Ordering::Relaxed),
        });
    }

    fn on_error(&self, error: &SessionError) {
        let _ = self.events.send_blocking(PlayerEvent::Failed {
            name: self.name.clone(),
            error: error.to_string(),
        });
    }
}
