// src/bodies.rs

//! Demo image-processing bodies: `cleanup`, `blur` and `save`.
//!
//! Images are treated as opaque byte buffers; "blurring" is a 3-tap box
//! filter over the bytes, which is enough to make every pass observable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{debug, info, warn};

use crate::chain::UnitSpec;
use crate::constraints::REQUIRES_CHARGING;
use crate::data::{Data, KEY_IMAGE_URI};
use crate::exec::{BodyOutcome, BodyRegistry, UnitContext};
use crate::fs::FileSystem;

pub const KIND_CLEANUP: &str = "cleanup";
pub const KIND_BLUR: &str = "blur";
pub const KIND_SAVE: &str = "save";

/// Unique name of the image manipulation chain.
pub const IMAGE_MANIPULATION_WORK_NAME: &str = "image_manipulation_work";
/// Tag carried by the unit whose output is the final image.
pub const TAG_OUTPUT: &str = "OUTPUT";

pub const OUTPUT_PREFIX: &str = "blur-filter-output-";
pub const SAVED_PREFIX: &str = "blurred-image-";

/// Box-filter passes applied by one `blur` unit.
pub const BLUR_PASSES: usize = 3;

/// Artificial per-unit delay so transitions are easy to watch.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);

/// `cleanup`, `blur_level` x `blur` (the first one fed `image_uri`), then a
/// tagged `save` that only runs while charging.
pub fn blur_chain_specs(image_uri: &str, blur_level: usize) -> Vec<UnitSpec> {
    let mut specs = vec![UnitSpec::new(KIND_CLEANUP)];

    for i in 0..blur_level {
        let blur = UnitSpec::new(KIND_BLUR);
        specs.push(if i == 0 {
            blur.input(Data::new().with(KEY_IMAGE_URI, image_uri))
        } else {
            blur
        });
    }

    specs.push(
        UnitSpec::new(KIND_SAVE)
            .constraint(REQUIRES_CHARGING)
            .tag(TAG_OUTPUT),
    );
    specs
}

/// The three demo bodies over a shared filesystem.
#[derive(Debug, Clone)]
pub struct ImageBodies {
    fs: Arc<dyn FileSystem>,
    output_dir: PathBuf,
    saved_dir: PathBuf,
    delay: Duration,
}

impl ImageBodies {
    pub fn new(fs: Arc<dyn FileSystem>, output_dir: impl Into<PathBuf>, saved_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            output_dir: output_dir.into(),
            saved_dir: saved_dir.into(),
            delay: DEFAULT_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn saved_dir(&self) -> &Path {
        &self.saved_dir
    }

    /// Register `cleanup`, `blur` and `save` in `registry`.
    pub fn register(&self, registry: &mut BodyRegistry) {
        let this = Arc::new(self.clone());

        let cleanup = Arc::clone(&this);
        registry.register_fn(KIND_CLEANUP, move |ctx: &UnitContext| cleanup.cleanup(ctx));

        let blur = Arc::clone(&this);
        registry.register_fn(KIND_BLUR, move |ctx: &UnitContext| blur.blur(ctx));

        let save = this;
        registry.register_fn(KIND_SAVE, move |ctx: &UnitContext| save.save(ctx));
    }

    /// Delete previous blur outputs.
    pub fn cleanup(&self, ctx: &UnitContext) -> BodyOutcome {
        ctx.notify("Cleaning up old temporary files");
        if !ctx.pause(self.delay) {
            return cancelled();
        }

        match self.remove_outputs() {
            Ok(removed) => {
                info!(unit = %ctx.unit, removed, "cleaned up blur outputs");
                BodyOutcome::Success(Data::new())
            }
            Err(err) => {
                warn!(unit = %ctx.unit, error = %err, "error cleaning up");
                BodyOutcome::Failure(err.to_string())
            }
        }
    }

    /// Blur the image named by `image_uri` into a new output file.
    pub fn blur(&self, ctx: &UnitContext) -> BodyOutcome {
        ctx.notify("Blurring image");
        if !ctx.pause(self.delay) {
            return cancelled();
        }

        let Some(uri) = ctx.input.get_str(KEY_IMAGE_URI).filter(|s| !s.trim().is_empty()) else {
            warn!(unit = %ctx.unit, "invalid input uri");
            return BodyOutcome::Failure("invalid input uri".to_string());
        };

        let result = (|| -> Result<Option<PathBuf>> {
            let mut pixels = self.fs.read(Path::new(uri))?;
            for pass in 0..BLUR_PASSES {
                if ctx.checkpoint().is_err() {
                    debug!(unit = %ctx.unit, pass, "blur interrupted");
                    return Ok(None);
                }
                pixels = box_blur(&pixels);
            }

            let path = self
                .output_dir
                .join(format!("{OUTPUT_PREFIX}{}.png", ctx.unit.0));
            self.fs.write(&path, &pixels)?;
            Ok(Some(path))
        })();

        match result {
            Ok(Some(path)) => {
                let uri = path.display().to_string();
                ctx.notify(&format!("uri={uri}"));
                BodyOutcome::Success(Data::new().with(KEY_IMAGE_URI, uri))
            }
            Ok(None) => cancelled(),
            Err(err) => {
                warn!(unit = %ctx.unit, error = %err, "error applying blur");
                BodyOutcome::Failure(err.to_string())
            }
        }
    }

    /// Copy the final image into the saved directory under a timestamped name.
    pub fn save(&self, ctx: &UnitContext) -> BodyOutcome {
        ctx.notify("Saving image");
        if !ctx.pause(self.delay) {
            return cancelled();
        }

        let Some(uri) = ctx.input.get_str(KEY_IMAGE_URI).filter(|s| !s.trim().is_empty()) else {
            warn!(unit = %ctx.unit, "nothing to save");
            return BodyOutcome::Failure("invalid input uri".to_string());
        };

        let stamp = chrono::Local::now().format("%Y.%m.%d-%H%M%S");
        let target = self
            .saved_dir
            .join(format!("{SAVED_PREFIX}{stamp}-{}.png", ctx.unit.0));

        let result = self
            .fs
            .read(Path::new(uri))
            .and_then(|bytes| self.fs.write(&target, &bytes));

        match result {
            Ok(()) => {
                info!(unit = %ctx.unit, saved = ?target, "saved image");
                BodyOutcome::Success(Data::new().with(KEY_IMAGE_URI, target.display().to_string()))
            }
            Err(err) => {
                warn!(unit = %ctx.unit, error = %err, "error saving image");
                BodyOutcome::Failure(err.to_string())
            }
        }
    }

    fn remove_outputs(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.fs.list_files(&self.output_dir)? {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow!("unreadable file name {:?}", path))?;
            if name.starts_with(OUTPUT_PREFIX) && name.ends_with(".png") {
                self.fs.remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn cancelled() -> BodyOutcome {
    BodyOutcome::Failure("cancelled".to_string())
}

/// One pass of a 3-tap box filter; edges reuse the border byte.
pub fn box_blur(input: &[u8]) -> Vec<u8> {
    let n = input.len();
    (0..n)
        .map(|i| {
            let left = input[i.saturating_sub(1)] as u16;
            let mid = input[i] as u16;
            let right = input[(i + 1).min(n - 1)] as u16;
            ((left + mid + right) / 3) as u8
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::chain::{ChainId, UnitId};
    use crate::fs::mock::MockFileSystem;
    use crate::notify::NullNotifier;

    fn bodies(fs: &MockFileSystem) -> ImageBodies {
        ImageBodies::new(Arc::new(fs.clone()), "out", "saved").with_delay(Duration::ZERO)
    }

    fn ctx(unit: u64, input: Data) -> UnitContext {
        UnitContext::new(
            UnitId(unit),
            ChainId(1),
            IMAGE_MANIPULATION_WORK_NAME,
            KIND_BLUR,
            input,
            CancellationToken::new(),
            Arc::new(NullNotifier),
        )
    }

    #[test]
    fn box_blur_smooths_a_spike() {
        assert_eq!(box_blur(&[0, 9, 0]), vec![3, 3, 3]);
        assert_eq!(box_blur(&[]), Vec::<u8>::new());
        assert_eq!(box_blur(&[7]), vec![7]);
    }

    #[test]
    fn blur_writes_output_and_reports_its_uri() {
        let fs = MockFileSystem::new();
        fs.add_file("in.png", vec![0u8, 90, 0, 90]);

        let outcome = bodies(&fs).blur(&ctx(7, Data::new().with(KEY_IMAGE_URI, "in.png")));
        let BodyOutcome::Success(out) = outcome else {
            panic!("blur failed: {outcome:?}");
        };

        let uri = out.get_str(KEY_IMAGE_URI).unwrap();
        assert_eq!(uri, Path::new("out").join("blur-filter-output-7.png").display().to_string());
        assert_eq!(fs.contents(uri).unwrap().len(), 4);
    }

    #[test]
    fn blur_without_uri_fails() {
        let fs = MockFileSystem::new();
        let outcome = bodies(&fs).blur(&ctx(1, Data::new().with(KEY_IMAGE_URI, "")));
        assert_eq!(outcome, BodyOutcome::Failure("invalid input uri".into()));
    }

    #[test]
    fn cleanup_removes_only_blur_outputs() {
        let fs = MockFileSystem::new();
        fs.add_file("out/blur-filter-output-1.png", "x");
        fs.add_file("out/blur-filter-output-2.png", "x");
        fs.add_file("out/keep.txt", "x");

        let outcome = bodies(&fs).cleanup(&ctx(1, Data::new()));
        assert_eq!(outcome, BodyOutcome::Success(Data::new()));
        assert_eq!(fs.paths(), vec![PathBuf::from("out/keep.txt")]);
    }

    #[test]
    fn save_copies_into_saved_dir() {
        let fs = MockFileSystem::new();
        fs.add_file("out/blur-filter-output-3.png", vec![1u8, 2, 3]);

        let outcome = bodies(&fs).save(&ctx(
            4,
            Data::new().with(KEY_IMAGE_URI, "out/blur-filter-output-3.png"),
        ));
        let BodyOutcome::Success(out) = outcome else {
            panic!("save failed: {outcome:?}");
        };
        let saved = out.get_str(KEY_IMAGE_URI).unwrap();
        assert!(saved.contains(SAVED_PREFIX));
        assert_eq!(fs.contents(saved), Some(vec![1u8, 2, 3]));
    }

    #[test]
    fn chain_specs_follow_blur_level() {
        let specs = blur_chain_specs("in.png", 2);
        let kinds: Vec<_> = specs.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(kinds, vec![KIND_CLEANUP, KIND_BLUR, KIND_BLUR, KIND_SAVE]);
        assert!(specs[1].static_input.is_some());
        assert!(specs[2].static_input.is_none());
        assert!(specs[3].constraints.contains(REQUIRES_CHARGING));
        assert!(specs[3].tags.contains(TAG_OUTPUT));
    }
}
