use std::sync::Arc;

use futures::future::join_all;
use tokio::runtime::Handle;

use crate::{
    pipeline::{PipeSettings, Pipeline},
    probe::{MediaInfo, Probe, SourceDescriptor},
    process::Decoder,
    sink::AudioOutput,
};

/// Ordered set of running pipelines; the order is the row-major grid order.
/// Built once at startup and never changed afterwards.
pub struct StreamRegistry {
    pipelines: Vec<Pipeline>,
}

impl StreamRegistry {
    /// Probes every source concurrently (bounded by `settings.probe_timeout`)
    /// and starts a pipeline for each one that answers. Sources that fail to
    /// probe or to spawn are dropped for the whole session.
    ///
    /// Blocks on `runtime`; call it from outside the runtime.
    pub fn bootstrap<P: Probe>(
        runtime: &Handle,
        urls: &[String],
        prober: &P,
        decoder: &dyn Decoder,
        output: Arc<dyn AudioOutput>,
        settings: &PipeSettings,
    ) -> Self {
        let probes = urls.iter().map(|url| async move {
            let result = tokio::time::timeout(settings.probe_timeout, prober.probe(url)).await;
            (url, result)
        });
        let results = runtime.block_on(join_all(probes));

        let mut pipelines = Vec::with_capacity(urls.len());
        for (url, result) in results {
            let info: MediaInfo = match result {
                Ok(Ok(info)) => info,
                Ok(Err(e)) => {
                    log::warn!("Registry: skipping {}: {}", url, e);
                    continue;
                }
                Err(_) => {
                    log::warn!(
                        "Registry: skipping {}: probe timed out after {:?}",
                        url,
                        settings.probe_timeout
                    );
                    continue;
                }
            };
            log::debug!("Registry: probe {}\n{}", url, info);

            let descriptor = match SourceDescriptor::from_media_info(url, &info, settings.audio) {
                Ok(d) => d,
                Err(e) => {
                    log::warn!("Registry: skipping {}: {}", url, e);
                    continue;
                }
            };

            match Pipeline::start(runtime, descriptor, decoder, Arc::clone(&output), settings) {
                Ok(pipeline) => pipelines.push(pipeline),
                Err(e) => log::warn!("Registry: skipping {}: {}", url, e),
            }
        }

        log::info!(
            "Registry: {} of {} sources running",
            pipelines.len(),
            urls.len()
        );
        Self { pipelines }
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Pipeline> {
        self.pipelines.get(index)
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pipeline> {
        self.pipelines.iter()
    }

    /// Stops every pipeline, blocking until all of their tasks are joined.
    pub fn stop_all(&self) {
        for pipeline in &self.pipelines {
            pipeline.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc, time::Duration};

    use super::*;
    use crate::{
        error::{PipeError, Result},
        probe::{DEFAULT_HEIGHT, DEFAULT_WIDTH, StreamInfo},
        test_support::{RecordingOutput, ScriptedDecoder, runtime},
    };

    enum Answer {
        Info(MediaInfo),
        Fail,
        Hang,
    }

    struct FakeProbe {
        answers: HashMap<String, Answer>,
    }

    impl Probe for FakeProbe {
        async fn probe(&self, url: &str) -> Result<MediaInfo> {
            match self.answers.get(url) {
                Some(Answer::Info(info)) => Ok(info.clone()),
                Some(Answer::Hang) => std::future::pending().await,
                Some(Answer::Fail) | None => Err(PipeError::ProbeFailed {
                    url: url.to_string(),
                    reason: "unreachable".to_string(),
                }),
            }
        }
    }

    fn stream(codec_type: &str, size: Option<(u32, u32)>) -> StreamInfo {
        StreamInfo {
            codec_type: codec_type.to_string(),
            width: size.map(|s| s.0),
            height: size.map(|s| s.1),
            ..StreamInfo::default()
        }
    }

    fn camera(size: Option<(u32, u32)>, audio: bool) -> Answer {
        let mut streams = vec![stream("video", size)];
        if audio {
            streams.push(stream("audio", None));
        }
        Answer::Info(MediaInfo {
            streams,
            ..MediaInfo::default()
        })
    }

    fn settings() -> PipeSettings {
        PipeSettings {
            probe_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
            ..PipeSettings::default()
        }
    }

    fn urls(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bootstrap_keeps_order_and_drops_failures() {
        let rt = runtime();
        let prober = FakeProbe {
            answers: HashMap::from([
                ("a".to_string(), camera(Some((1920, 1080)), true)),
                ("b".to_string(), Answer::Fail),
                ("c".to_string(), Answer::Hang),
                ("d".to_string(), camera(None, false)),
                ("e".to_string(), Answer::Info(MediaInfo {
                    streams: vec![stream("audio", None)],
                    ..MediaInfo::default()
                })),
                ("f".to_string(), camera(Some((640, 360)), false)),
            ]),
        };
        let decoder = ScriptedDecoder::default();

        let registry = StreamRegistry::bootstrap(
            rt.handle(),
            &urls(&["a", "b", "c", "d", "e", "f"]),
            &prober,
            &decoder,
            Arc::new(RecordingOutput::default()),
            &settings(),
        );

        let kept: Vec<&str> = registry.iter().map(|p| p.url()).collect();
        assert_eq!(kept, vec!["a", "d", "f"]);
        assert_eq!(registry.len(), 3);

        let a = registry.get(0).unwrap().descriptor();
        assert_eq!((a.width, a.height, a.has_audio), (1920, 1080, true));
        let d = registry.get(1).unwrap().descriptor();
        assert_eq!((d.width, d.height), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
        assert!(registry.get(3).is_none());

        registry.stop_all();
        assert!(registry.iter().all(|p| !p.is_alive()));
    }

    #[test]
    fn test_bootstrap_omits_spawn_failures() {
        let rt = runtime();
        let prober = FakeProbe {
            answers: HashMap::from([
                ("a".to_string(), camera(Some((320, 240)), false)),
                ("b".to_string(), camera(Some((320, 240)), false)),
            ]),
        };
        let mut decoder = ScriptedDecoder::default();
        decoder.fail_urls.insert("a".to_string());

        let registry = StreamRegistry::bootstrap(
            rt.handle(),
            &urls(&["a", "b"]),
            &prober,
            &decoder,
            Arc::new(RecordingOutput::default()),
            &settings(),
        );

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(0).unwrap().url(), "b");
        registry.stop_all();
    }

    #[test]
    fn test_bootstrap_respects_audio_setting() {
        let rt = runtime();
        let prober = FakeProbe {
            answers: HashMap::from([("a".to_string(), camera(Some((320, 240)), true))]),
        };
        let decoder = ScriptedDecoder::default();

        let registry = StreamRegistry::bootstrap(
            rt.handle(),
            &urls(&["a"]),
            &prober,
            &decoder,
            Arc::new(RecordingOutput::default()),
            &PipeSettings {
                audio: false,
                ..settings()
            },
        );

        assert!(!registry.get(0).unwrap().audio_enabled());
        assert!(!decoder.requests.lock()[0].audio);
        registry.stop_all();
    }

    #[test]
    fn test_bootstrap_with_nothing_reachable() {
        let rt = runtime();
        let prober = FakeProbe {
            answers: HashMap::new(),
        };
        let decoder = ScriptedDecoder::default();

        let registry = StreamRegistry::bootstrap(
            rt.handle(),
            &urls(&["x", "y"]),
            &prober,
            &decoder,
            Arc::new(RecordingOutput::default()),
            &settings(),
        );
        assert!(registry.is_empty());
        registry.stop_all();
    }
}
