//! Randomised checks of the concurrency bound and of dispatch determinism.

use parking_lot::Mutex;
use pipeflow::core::{PipeForward, PipeLineExit, PipeRunResult};
use pipeflow::errors::PipeRunError;
use pipeflow::message::Message;
use pipeflow::pipeline::{PipeLineBuilder, PipeSpec};
use pipeflow::pipes::{FnPipe, PipeContext};
use pipeflow::testing::{PipeHarness, SlowPipe};
use proptest::prelude::*;
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

type Trail = Arc<Mutex<Vec<String>>>;

/// Records the pipe name, then takes the forward named by the first
/// character of the message and passes the rest on; `done` when empty.
fn hop(trail: Trail) -> impl Fn(&PipeContext<'_>, Message) -> Result<PipeRunResult, PipeRunError> + Send + Sync {
    move |ctx, message| {
        trail.lock().push(ctx.pipe_name().to_string());
        let text = message.as_string_or_empty()?;
        let mut chars = text.chars();
        let forward = chars.next().map_or_else(|| "done".to_string(), |c| c.to_string());
        Ok(PipeRunResult::new(Message::text(chars.as_str()), ctx.forward(&forward)?))
    }
}

fn hopping_pipeline(trail: &Trail) -> PipeHarness {
    let spec = |name: &str| {
        PipeSpec::new(name, Arc::new(FnPipe::new(name, hop(trail.clone()))))
            .with_forward(PipeForward::new("a", "A"))
            .with_forward(PipeForward::new("b", "B"))
            .with_forward(PipeForward::new("done", "READY"))
    };
    let builder = PipeLineBuilder::new("hops")
        .pipe(spec("start"))
        .unwrap()
        .pipe(spec("A"))
        .unwrap()
        .pipe(spec("B"))
        .unwrap()
        .exit(PipeLineExit::success("READY"))
        .unwrap();
    PipeHarness::new(builder).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn throttled_pipe_never_exceeds_limit(limit in 1_i32..4, callers in 1_usize..12, delay_ms in 1_u64..4) {
        let rt = runtime();
        let slow = Arc::new(SlowPipe::with_delay_ms(delay_ms));
        let h = PipeHarness::for_spec(PipeSpec::new("pipe", slow.clone()).with_max_threads(limit)).unwrap();

        rt.block_on(async {
            let runs: Vec<_> = (0..callers)
                .map(|i| {
                    let h = h.clone();
                    tokio::spawn(async move { h.run(format!("m{i}")).await })
                })
                .collect();
            for run in runs {
                run.await.unwrap().unwrap();
            }
        });

        prop_assert!(slow.peak() <= usize::try_from(limit).unwrap());
        prop_assert_eq!(slow.calls(), callers);
        prop_assert_eq!(slow.active(), 0);
    }

    #[test]
    fn same_forwards_visit_same_pipes(route in "[ab]{0,8}") {
        let rt = runtime();
        let trail: Trail = Arc::new(Mutex::new(Vec::new()));
        let h = hopping_pipeline(&trail);

        let expected: Vec<String> = std::iter::once("start".to_string())
            .chain(route.chars().map(|c| c.to_ascii_uppercase().to_string()))
            .collect();
        for _ in 0..2 {
            trail.lock().clear();
            rt.block_on(h.run(route.as_str())).unwrap();
            prop_assert_eq!(&*trail.lock(), &expected);
        }
    }
}
