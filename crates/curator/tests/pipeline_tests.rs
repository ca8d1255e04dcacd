//! End-to-end pipeline runs against in-memory and mock HTTP collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use curator::{
    Classifier, ClassifyError, FileSink, LineSource, MemorySink, OllamaClassifier, OllamaConfig,
    Pipeline, PipelineConfig, PipelineError, RunOutcome, Sink, SinkError, SourceError, VecSource,
    Verdict,
};

/// Words starting with `z` are rare. `cat` times out, `slow*` never returns.
#[derive(Default)]
struct WordClassifier {
    active: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl WordClassifier {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Classifier for WordClassifier {
    async fn classify(&self, item: &str) -> Result<Verdict, ClassifyError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if item.starts_with("slow") {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match item {
            "cat" => Err(ClassifyError::Timeout(Duration::from_secs(60))),
            _ if item.starts_with('z') => Ok(Verdict::new(true, "True. Rare word.")),
            _ => Ok(Verdict::new(false, "False. Common word.")),
        }
    }
}

struct BrokenSink;

#[async_trait]
impl Sink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn append(&mut self, _item: &str, _diagnostic: &str) -> Result<(), SinkError> {
        Err(SinkError::Write {
            name: "broken".to_string(),
            source: std::io::Error::other("disk full"),
        })
    }
}

fn pipeline(config: PipelineConfig, classifier: Arc<dyn Classifier>) -> Pipeline {
    Pipeline::new(config, classifier).unwrap()
}

#[tokio::test]
async fn item_cap_limits_what_is_read() {
    let positive = MemorySink::new("excluded");
    let negative = MemorySink::new("curated");
    let mut source = VecSource::new(["apple", "zzyzx", "cat"]);

    let outcome = pipeline(
        PipelineConfig::new().with_concurrency(2).with_max_items(2),
        Arc::new(WordClassifier::default()),
    )
    .run(
        &mut source,
        Box::new(positive.clone()),
        Box::new(negative.clone()),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.read, 2);
    assert_eq!(summary.positive, 1);
    assert_eq!(summary.negative, 1);
    assert_eq!(positive.items(), vec!["zzyzx"]);
    assert_eq!(negative.items(), vec!["apple"]);
}

#[tokio::test]
async fn classification_failure_is_routed_negative() {
    let positive = MemorySink::new("excluded");
    let negative = MemorySink::new("curated");
    let mut source = VecSource::new(["apple", "zzyzx", "cat"]);

    let outcome = pipeline(PipelineConfig::new(), Arc::new(WordClassifier::default()))
        .run(
            &mut source,
            Box::new(positive.clone()),
            Box::new(negative.clone()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.summary().total(), 3);
    assert_eq!(positive.items(), vec!["zzyzx"]);

    let mut curated = negative.entries();
    curated.sort();
    assert_eq!(curated.len(), 2);
    assert_eq!(curated[0].0, "apple");
    assert_eq!(curated[1].0, "cat");
    assert!(curated[1].1.contains("timed out"), "got {:?}", curated[1]);
}

#[tokio::test]
async fn empty_source_completes_with_zero_counts() {
    let mut source = VecSource::default();
    let outcome = pipeline(PipelineConfig::new(), Arc::new(WordClassifier::default()))
        .run(
            &mut source,
            Box::new(MemorySink::new("excluded")),
            Box::new(MemorySink::new("curated")),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!((summary.read, summary.total()), (0, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_after_first_item_returns_promptly() {
    let positive = MemorySink::new("excluded");
    let negative = MemorySink::new("curated");
    let mut source = VecSource::new(["apple", "slow-zzyzx", "slow-cat"]);
    let cancel = CancellationToken::new();

    let watcher = {
        let negative = negative.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while negative.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            cancel.cancel();
        })
    };

    let run = pipeline(
        PipelineConfig::new()
            .with_concurrency(3)
            .with_shutdown_grace(Duration::from_secs(1)),
        Arc::new(WordClassifier::default()),
    );
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        run.run(
            &mut source,
            Box::new(positive.clone()),
            Box::new(negative.clone()),
            &cancel,
        ),
    )
    .await
    .expect("cancelled run should return promptly")
    .unwrap();
    watcher.await.unwrap();

    let RunOutcome::Cancelled(summary) = outcome else {
        panic!("expected cancellation, got {outcome:?}");
    };
    assert_eq!(summary.negative, 1);
    assert_eq!(summary.positive, 0);
    assert_eq!(negative.items(), vec!["apple"]);
    assert!(positive.is_empty());
}

#[tokio::test]
async fn cancelled_before_start_reads_nothing_new() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut source = VecSource::new(["apple", "zzyzx"]);

    let outcome = pipeline(PipelineConfig::new(), Arc::new(WordClassifier::default()))
        .run(
            &mut source,
            Box::new(MemorySink::new("excluded")),
            Box::new(MemorySink::new("curated")),
            &cancel,
        )
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Cancelled(_)));
    assert_eq!(outcome.summary().read, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn stress_ten_thousand_items_with_fifty_permits() {
    let classifier = Arc::new(WordClassifier::with_delay(Duration::from_micros(100)));
    let positive = MemorySink::new("excluded");
    let negative = MemorySink::new("curated");
    let mut source = VecSource::new((0..10_000).map(|i| {
        if i % 10 == 0 {
            format!("z{i}")
        } else {
            format!("w{i}")
        }
    }));

    let outcome = pipeline(
        PipelineConfig::new().with_concurrency(50),
        classifier.clone(),
    )
    .run(
        &mut source,
        Box::new(positive.clone()),
        Box::new(negative.clone()),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.read, 10_000);
    assert_eq!(summary.positive, 1_000);
    assert_eq!(summary.negative, 9_000);
    assert_eq!(positive.len() + negative.len(), 10_000);
    assert!(classifier.peak.load(Ordering::SeqCst) <= 50);
}

#[tokio::test]
async fn read_error_finishes_items_already_read() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("words.txt");
    std::fs::write(&input, b"apple\n\xff\xfe\ncat\n").unwrap();

    let negative = MemorySink::new("curated");
    let mut source = LineSource::open(&input).await.unwrap();
    let result = pipeline(PipelineConfig::new(), Arc::new(WordClassifier::default()))
        .run(
            &mut source,
            Box::new(MemorySink::new("excluded")),
            Box::new(negative.clone()),
            &CancellationToken::new(),
        )
        .await;

    assert!(
        matches!(result, Err(PipelineError::Source(SourceError::Read { line: 2, .. }))),
        "got {result:?}"
    );
    assert_eq!(negative.items(), vec!["apple"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sink_failure_stops_the_run() {
    let mut source = VecSource::new((0..500).map(|i| format!("z{i}")));
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline(
            PipelineConfig::new()
                .with_concurrency(4)
                .with_channel_capacity(2),
            Arc::new(WordClassifier::default()),
        )
        .run(
            &mut source,
            Box::new(BrokenSink),
            Box::new(MemorySink::new("curated")),
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("sink failure must not deadlock the run");

    match result {
        Err(PipelineError::Sink(e)) => assert!(e.to_string().contains("disk full")),
        other => panic!("expected sink failure, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let err = Pipeline::new(
        PipelineConfig::new().with_concurrency(0),
        Arc::new(WordClassifier::default()),
    )
    .err()
    .expect("zero concurrency must be rejected");
    assert!(matches!(err, PipelineError::InvalidConfig(_)));
}

#[tokio::test]
async fn ollama_run_writes_output_files() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("zzyzx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "llama3.2",
            "response": "True. Zzyzx is a place name.",
            "done": true
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "llama3.2",
            "response": "False.",
            "done": true
        })))
        .with_priority(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("words.txt");
    std::fs::write(&input, "apple\nzzyzx\n\ncat\n").unwrap();

    let classifier = OllamaClassifier::new(OllamaConfig::new(server.uri())).unwrap();
    let mut source = LineSource::open(&input).await.unwrap();
    let excluded = FileSink::create(dir.path(), "excluded").await.unwrap();
    let curated = FileSink::create(dir.path(), "curated").await.unwrap();

    let outcome = pipeline(PipelineConfig::new().with_concurrency(2), Arc::new(classifier))
        .run(
            &mut source,
            Box::new(excluded),
            Box::new(curated),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(outcome.is_completed());
    assert_eq!(outcome.summary().read, 3);

    let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
    assert_eq!(read("excluded.txt"), "zzyzx\n");
    assert_eq!(
        read("excluded.response.txt"),
        "zzyzx: True. Zzyzx is a place name.\n"
    );

    let mut curated: Vec<String> = read("curated.txt").lines().map(String::from).collect();
    curated.sort();
    assert_eq!(curated, vec!["apple", "cat"]);
    assert_eq!(read("curated.response.txt").lines().count(), 2);
}
