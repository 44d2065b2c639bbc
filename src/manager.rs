//! Generation manager: keeps one pipeline resident and queues requests.
//!
//! The manager owns a single [`MusicGenerator`] on a dedicated blocking
//! thread. Callers submit requests through a cloneable handle; they are
//! served strictly one at a time, so the pipeline's residency state is
//! never touched by two generations at once.
//!
//! # Example
//!
//! ```no_run
//! use heartmula_rs::config::GenerationParams;
//! use heartmula_rs::manager::{GenerationManager, MusicGenerator};
//! use heartmula_rs::pipeline::GenerationInputs;
//!
//! async fn run<G: MusicGenerator + Send + 'static>(
//!     load: impl FnOnce() -> heartmula_rs::Result<G> + Send + 'static,
//! ) -> heartmula_rs::Result<()> {
//!     let manager = GenerationManager::start(load).await?;
//!     let inputs = GenerationInputs::new("pop, upbeat", "la la la");
//!     let summary = manager.generate(inputs, GenerationParams::default()).await?;
//!     println!("wrote {}", summary.path.display());
//!     Ok(())
//! }
//! ```

use tokio::sync::{mpsc, oneshot};

use crate::config::GenerationParams;
use crate::model::{CodecModel, ModelLoader, SequenceModel};
use crate::pipeline::{GenerationInputs, GenerationSummary, HeartMulaPipeline};
use crate::text::TextTokenizer;
use crate::{Error, Result};

/// Requests that may wait behind the one being served.
const QUEUE_DEPTH: usize = 64;

/// Anything that can turn inputs into a written song.
pub trait MusicGenerator {
    fn generate(
        &mut self,
        inputs: &GenerationInputs,
        params: &GenerationParams,
    ) -> Result<GenerationSummary>;
}

impl<S, C, T> MusicGenerator for HeartMulaPipeline<S, C, T>
where
    S: ModelLoader,
    S::Model: SequenceModel,
    C: ModelLoader,
    C::Model: CodecModel,
    T: TextTokenizer,
{
    fn generate(
        &mut self,
        inputs: &GenerationInputs,
        params: &GenerationParams,
    ) -> Result<GenerationSummary> {
        HeartMulaPipeline::generate(self, inputs, params)
    }
}

/// A submitted generation request.
struct PendingRequest {
    inputs: GenerationInputs,
    params: GenerationParams,
    reply: oneshot::Sender<Result<GenerationSummary>>,
}

/// Handle for submitting generation requests to a running manager.
#[derive(Clone)]
pub struct GenerationManager {
    tx: mpsc::Sender<PendingRequest>,
}

impl GenerationManager {
    /// Build the generator with `load` and start serving requests.
    ///
    /// `load` runs on a blocking thread since it reads checkpoints and may
    /// load models eagerly. Returns an error if it fails.
    pub async fn start<G, F>(load: F) -> Result<Self>
    where
        G: MusicGenerator + Send + 'static,
        F: FnOnce() -> Result<G> + Send + 'static,
    {
        let generator = tokio::task::spawn_blocking(load)
            .await
            .map_err(|join_error| {
                Error::Manager(format!("pipeline load task panicked: {join_error}"))
            })??;

        let (tx, rx) = mpsc::channel::<PendingRequest>(QUEUE_DEPTH);
        tokio::task::spawn_blocking(move || run_manager(generator, rx));
        tracing::info!("generation manager started");

        Ok(Self { tx })
    }

    /// Submit a generation request and wait for the result.
    pub async fn generate(
        &self,
        inputs: GenerationInputs,
        params: GenerationParams,
    ) -> Result<GenerationSummary> {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<GenerationSummary>>();
        self.tx
            .send(PendingRequest {
                inputs,
                params,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Manager("manager has shut down".into()))?;

        reply_rx
            .await
            .map_err(|_| Error::Manager("manager dropped reply channel".into()))?
    }
}

/// The manager loop, run on a dedicated blocking thread until every handle is dropped.
fn run_manager<G: MusicGenerator>(mut generator: G, mut rx: mpsc::Receiver<PendingRequest>) {
    while let Some(request) = rx.blocking_recv() {
        let result = generator.generate(&request.inputs, &request.params);
        if let Err(error) = &result {
            tracing::warn!(%error, kind = ?error.kind(), "generation failed");
        }
        // The caller may have given up waiting.
        let _ = request.reply.send(result);
    }
    tracing::info!("generation manager shut down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::pipeline::StopReason;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    /// Records call order and fails on an empty lyric.
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl MusicGenerator for Recorder {
        fn generate(
            &mut self,
            inputs: &GenerationInputs,
            params: &GenerationParams,
        ) -> Result<GenerationSummary> {
            self.calls.lock().unwrap().push(inputs.lyrics.clone());
            if inputs.lyrics.is_empty() {
                return Err(Error::InvalidInput("no lyrics".into()));
            }
            Ok(GenerationSummary {
                path: params.save_path.clone(),
                frames: 1,
                stop_reason: StopReason::MaxLength,
                duration_ms: 80,
                sample_rate: 48_000,
                seed: params.seed.unwrap_or(0),
            })
        }
    }

    fn params(name: &str) -> GenerationParams {
        GenerationParams {
            save_path: PathBuf::from(name),
            seed: Some(1),
            ..GenerationParams::default()
        }
    }

    #[tokio::test]
    async fn test_requests_served_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            calls: calls.clone(),
        };
        let manager = GenerationManager::start(move || Ok(recorder)).await.unwrap();

        for lyric in ["one", "two", "three"] {
            let summary = manager
                .generate(GenerationInputs::new("pop", lyric), params(lyric))
                .await
                .unwrap();
            assert_eq!(summary.path, PathBuf::from(lyric));
        }
        assert_eq!(*calls.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_worker() {
        let recorder = Recorder {
            calls: Arc::default(),
        };
        let manager = GenerationManager::start(move || Ok(recorder)).await.unwrap();

        let error = manager
            .generate(GenerationInputs::new("pop", ""), params("a.ogg"))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InputValidation);

        let summary = manager
            .generate(GenerationInputs::new("pop", "la"), params("b.ogg"))
            .await
            .unwrap();
        assert_eq!(summary.path, PathBuf::from("b.ogg"));
    }

    #[tokio::test]
    async fn test_load_failure_is_reported() {
        let result = GenerationManager::start(|| -> Result<Recorder> {
            Err(Error::Config("no checkpoint".into()))
        })
        .await;
        assert_eq!(result.err().unwrap().kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_serves_a_pipeline() {
        use crate::checkpoint::CheckpointPaths;
        use crate::config::GenerationConfig;
        use crate::device::{DeviceKind, DeviceSpec, PrecisionSpec, plan};
        use crate::testing::{CountingLoader, StubCodec, StubSequenceModel, StubTokenizer};

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let manager = GenerationManager::start(move || {
            HeartMulaPipeline::from_parts(
                StubTokenizer,
                GenerationConfig::default(),
                CheckpointPaths {
                    sequence_model: root.join("HeartMuLa-oss-3B"),
                    codec_model: root.join("HeartCodec-oss"),
                    tokenizer: root.join("tokenizer.json"),
                    gen_config: root.join("gen_config.json"),
                },
                plan(
                    DeviceSpec::Single(DeviceKind::Cpu),
                    PrecisionSpec::Single(candle_core::DType::F32),
                    true,
                ),
                CountingLoader::new(StubSequenceModel::never_stops),
                CountingLoader::new(StubCodec::default),
            )
        })
        .await
        .unwrap();

        let out = dir.path().join("song.wav");
        let summary = manager
            .generate(
                GenerationInputs::new("pop, upbeat", "la la la"),
                GenerationParams {
                    max_audio_length_ms: 400,
                    save_path: out.clone(),
                    seed: Some(3),
                    ..GenerationParams::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(summary.frames, 5);
        assert!(out.is_file());
    }
}
