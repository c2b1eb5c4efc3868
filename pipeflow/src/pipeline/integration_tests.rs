//! End-to-end runs through the engine, the processor chains and the dispatch loop.

#[cfg(test)]
mod tests {
    use crate::core::{ExitState, PipeForward, PipeLineExit, PipeLineResult};
    use crate::errors::PipeRunError;
    use crate::message::Message;
    use crate::pipeline::{Engine, ExitHandler, PipeLineBuilder, PipeSpec};
    use crate::pipes::{EchoPipe, FixedResultPipe, JsonValidatorPipe, JsonWrapperPipe, SwitchPipe};
    use crate::session::{Session, EXIT_CODE_KEY, EXIT_STATE_KEY, TS_RECEIVED_KEY};
    use crate::testing::{assert_result_state, assert_result_text, FailingPipe, PipeHarness};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<(String, Option<ExitState>)>>,
    }

    #[async_trait]
    impl ExitHandler for RecordingHandler {
        fn name(&self) -> &str {
            "recording"
        }

        async fn at_end_of_pipeline(
            &self,
            message_id: &str,
            result: Option<&PipeLineResult>,
            _session: &Session,
        ) -> anyhow::Result<()> {
            self.seen.lock().push((message_id.to_string(), result.map(|r| r.state)));
            Ok(())
        }
    }

    #[derive(Debug)]
    struct BrokenHandler {
        panic: bool,
    }

    #[async_trait]
    impl ExitHandler for BrokenHandler {
        fn name(&self) -> &str {
            "broken"
        }

        async fn at_end_of_pipeline(
            &self,
            _message_id: &str,
            _result: Option<&PipeLineResult>,
            _session: &Session,
        ) -> anyhow::Result<()> {
            if self.panic {
                panic!("handler blew up");
            }
            anyhow::bail!("handler failed")
        }
    }

    fn routing_pipeline() -> PipeLineBuilder {
        PipeLineBuilder::new("route")
            .pipe(
                PipeSpec::new("switch", Arc::new(SwitchPipe::new()))
                    .with_forward(PipeForward::new("accept", "answer"))
                    .with_forward(PipeForward::new("reject", "REJECTED")),
            )
            .unwrap()
            .pipe(PipeSpec::new("answer", Arc::new(FixedResultPipe::new("accepted"))))
            .unwrap()
            .exit(PipeLineExit::success("READY"))
            .unwrap()
            .exit(PipeLineExit::error("REJECTED").with_exit_code(400))
            .unwrap()
    }

    #[tokio::test]
    async fn test_forwards_walk_pipes_to_exit() {
        let h = PipeHarness::new(routing_pipeline()).unwrap();
        let result = h.run("accept").await.unwrap();
        assert_result_state(&result, ExitState::Success, 0);
        assert_result_text(&result, "accepted");
    }

    #[tokio::test]
    async fn test_error_exit_sets_session_state() {
        let h = PipeHarness::new(routing_pipeline()).unwrap();
        let session = Session::new();
        let result = h.run_in(&session, "reject").await.unwrap();

        assert_result_state(&result, ExitState::Error, 400);
        assert_result_text(&result, "reject");
        assert_eq!(session.get_string(EXIT_STATE_KEY).as_deref(), Some("ERROR"));
        assert_eq!(session.get_i64(EXIT_CODE_KEY, 0), 400);
    }

    #[tokio::test]
    async fn test_unknown_route_fails_run() {
        let h = PipeHarness::new(routing_pipeline()).unwrap();
        let err = h.run("maybe").await.unwrap_err();
        assert_eq!(err.pipe_in_error(), Some("switch"));
    }

    #[tokio::test]
    async fn test_empty_result_exit() {
        let builder = PipeLineBuilder::new("quiet")
            .pipe(PipeSpec::new("echo", Arc::new(EchoPipe)))
            .unwrap()
            .exit(PipeLineExit::success("DONE").with_empty_result())
            .unwrap();
        let h = PipeHarness::new(builder).unwrap();
        let result = h.run("something").await.unwrap();
        assert!(result.result.is_null());
    }

    #[tokio::test]
    async fn test_null_message_replaced() {
        let builder = PipeLineBuilder::new("defaults")
            .transform_null_message("<empty/>")
            .pipe(PipeSpec::new("echo", Arc::new(EchoPipe)))
            .unwrap();
        let h = PipeHarness::new(builder).unwrap();
        let result = h.run(Message::null()).await.unwrap();
        assert_result_text(&result, "<empty/>");
    }

    #[tokio::test]
    async fn test_empty_input_pre_processed_by_other_pipeline() {
        let engine = Engine::new();
        let filler = PipeLineBuilder::new("filler")
            .pipe(PipeSpec::new("fill", Arc::new(FixedResultPipe::new("filled"))))
            .unwrap()
            .build(engine.warnings())
            .unwrap();
        engine.register(filler);
        let builder = PipeLineBuilder::new("main")
            .run_before_on_empty_input("filler")
            .pipe(PipeSpec::new("echo", Arc::new(EchoPipe)))
            .unwrap();
        let h = PipeHarness::with_engine(engine, builder).unwrap();

        assert_result_text(&h.run("").await.unwrap(), "filled");
        assert_result_text(&h.run("given").await.unwrap(), "given");
    }

    #[tokio::test]
    async fn test_input_validator_redirects_to_exit() {
        let builder = PipeLineBuilder::new("validated")
            .input_validator(
                PipeSpec::new("validator", Arc::new(JsonValidatorPipe::new().with_required_field("id")))
                    .with_forward(PipeForward::new("failure", "INVALID")),
            )
            .pipe(PipeSpec::new("answer", Arc::new(FixedResultPipe::new("processed"))))
            .unwrap()
            .exit(PipeLineExit::success("READY"))
            .unwrap()
            .exit(PipeLineExit::error("INVALID").with_exit_code(422))
            .unwrap();
        let h = PipeHarness::new(builder).unwrap();

        let valid = h.run(r#"{"id": 1}"#).await.unwrap();
        assert_result_text(&valid, "processed");

        let invalid = h.run(r#"{"name": "x"}"#).await.unwrap();
        assert_result_state(&invalid, ExitState::Error, 422);
    }

    #[tokio::test]
    async fn test_wrappers_around_pipes() {
        let builder = PipeLineBuilder::new("wrapped")
            .input_wrapper(PipeSpec::new("in", Arc::new(JsonWrapperPipe::unwrap_root("request"))))
            .output_wrapper(PipeSpec::new("out", Arc::new(JsonWrapperPipe::wrap("response"))))
            .pipe(PipeSpec::new("echo", Arc::new(EchoPipe)))
            .unwrap();
        let h = PipeHarness::new(builder).unwrap();

        let result = h.run(r#"{"request": {"n": 5}}"#).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&result.result.as_string().unwrap().unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"response": {"n": 5}}));
    }

    #[tokio::test]
    async fn test_exit_handlers_see_every_run() {
        let recorder = Arc::new(RecordingHandler::default());
        let builder = routing_pipeline()
            .exit_handler(Arc::new(BrokenHandler { panic: false }))
            .exit_handler(Arc::new(BrokenHandler { panic: true }))
            .exit_handler(recorder.clone());
        let h = PipeHarness::new(builder).unwrap();

        let ok = h.run_in(&Session::for_message(Some("m-1"), None), "accept").await.unwrap();
        assert_result_text(&ok, "accepted");
        assert!(h.run_in(&Session::for_message(Some("m-2"), None), "unknown").await.is_err());

        let seen = recorder.seen.lock().clone();
        assert_eq!(
            seen,
            vec![("m-1".to_string(), Some(ExitState::Success)), ("m-2".to_string(), None)]
        );
    }

    #[tokio::test]
    async fn test_process_message_direct_formats_error() {
        let h = PipeHarness::single(FailingPipe::new("backend down")).unwrap();
        let session = Session::new();
        let result = h
            .engine()
            .process_message_direct("test", "m-9", Message::text("payload"), &session)
            .await;

        assert_result_state(&result, ExitState::Error, 1);
        assert!(session.contains_key(TS_RECEIVED_KEY));
        let doc: serde_json::Value = serde_json::from_str(&result.result.as_string().unwrap().unwrap()).unwrap();
        assert_eq!(doc["errorMessage"]["location"]["pipe"], "pipe");
        assert_eq!(doc["errorMessage"]["location"]["pipeline"], "test");
        assert_eq!(doc["errorMessage"]["originalMessage"]["messageId"], "m-9");
        assert_eq!(doc["errorMessage"]["originalMessage"]["content"], "payload");
    }

    #[tokio::test]
    async fn test_process_message_unknown_pipeline() {
        let engine = Engine::new();
        let err = engine
            .process_message("nowhere", "m-1", Message::text("x"), &Session::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipeRunError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_statistics_accumulate_across_runs() {
        let h = PipeHarness::new(routing_pipeline()).unwrap();
        for _ in 0..3 {
            h.run("accept").await.unwrap();
        }
        let snapshot = h.pipeline().statistics().snapshot();
        assert_eq!(snapshot.duration.count, 3);
        assert_eq!(snapshot.pipes["answer"].duration.count, 3);
        assert_eq!(snapshot.pipes["switch"].duration.count, 3);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let h = PipeHarness::new(routing_pipeline()).unwrap();
        h.engine().start().await.unwrap();
        assert_result_text(&h.run("accept").await.unwrap(), "accepted");
        h.engine().stop().await;
    }
}
