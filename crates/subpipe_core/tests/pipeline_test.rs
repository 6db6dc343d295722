//! Integration tests for the stage runner.
//!
//! These drive the standard topology end to end with scripted workers:
//! - Completed jobs are not touched again
//! - Interrupted and failed jobs resume where they stopped
//! - Optional stage failures fall back to upstream artifacts

mod common;

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use common::{manifest_bytes, scripted, standard_workers, writer, Calls, Harness, STANDARD_STAGES};
use subpipe_core::manifest::{PipelineManifest, PipelineStatus, StageManifest, StageStatus};
use subpipe_core::config::WorkerSettings;
use subpipe_core::orchestrator::{CommandWorker, PipelineError, WorkerOutcome, WorkerRequest};

#[test]
fn full_run_completes_every_enabled_stage() {
    let harness = Harness::new();
    let ctx = harness.create_job();
    let calls = Calls::default();

    let summary = harness.runner(standard_workers(&calls)).run(&ctx).unwrap();

    assert_eq!(summary.status, PipelineStatus::Completed);
    assert_eq!(
        summary.executed,
        vec!["demux", "vad", "refine-vad", "diarize", "transcribe", "subtitles", "mux"]
    );
    // No glossary and no target language configured.
    assert_eq!(summary.skipped, vec!["correct", "translate"]);

    let manifest = PipelineManifest::load(&ctx.layout.pipeline_manifest()).unwrap();
    assert!(manifest.is_completed());
    assert_eq!(manifest.next_stage(), None);
    assert!(manifest.completed_at.is_some());

    let subtitles_input = calls.inputs("subtitles").unwrap();
    assert_eq!(
        subtitles_input["transcript"],
        ctx.layout.root().join("05_transcribe/transcript.json")
    );

    let mux = StageManifest::load(&ctx.layout.stage_manifest(9, "mux")).unwrap();
    assert_eq!(mux.status, StageStatus::Success);
    let video = mux.output("video").unwrap();
    assert!(video.exists);
    assert!(video.size.unwrap() > 0);
}

#[test]
fn completed_job_is_not_touched_again() {
    let harness = Harness::new();
    let ctx = harness.create_job();
    let calls = Calls::default();
    let runner = harness.runner(standard_workers(&calls));

    runner.run(&ctx).unwrap();
    let dispatched = calls.total();
    let before = manifest_bytes(ctx.layout.root());

    let summary = runner.run(&ctx).unwrap();

    assert_eq!(summary.status, PipelineStatus::Completed);
    assert!(summary.executed.is_empty());
    assert_eq!(summary.already_done, STANDARD_STAGES.to_vec());
    assert_eq!(calls.total(), dispatched);
    assert_eq!(manifest_bytes(ctx.layout.root()), before);
}

#[test]
fn interrupted_stage_is_rerun_without_repeating_earlier_stages() {
    let harness = Harness::new();
    let ctx = harness.create_job();
    let calls = Calls::default();

    let crashing = standard_workers(&calls).with("transcribe", |_req: &WorkerRequest| -> WorkerOutcome {
        panic!("worker host crashed")
    });
    let crashed = panic::catch_unwind(AssertUnwindSafe(|| harness.runner(crashing).run(&ctx)));
    assert!(crashed.is_err());

    let manifest = PipelineManifest::load(&ctx.layout.pipeline_manifest()).unwrap();
    assert_eq!(manifest.status, PipelineStatus::Running);
    assert_eq!(manifest.stage_status("transcribe"), Some(StageStatus::Running));
    assert!(!manifest.is_done("transcribe"));
    assert_eq!(manifest.next_stage(), Some("transcribe"));

    let summary = harness.runner(standard_workers(&calls)).run(&ctx).unwrap();

    assert_eq!(summary.status, PipelineStatus::Completed);
    assert_eq!(
        summary.already_done,
        vec!["demux", "vad", "refine-vad", "diarize"]
    );
    assert_eq!(summary.executed[0], "transcribe");
    for stage in ["demux", "vad", "refine-vad", "diarize"] {
        assert_eq!(calls.count(stage), 1, "{} ran twice", stage);
    }

    let transcribe = StageManifest::load(&ctx.layout.stage_manifest(5, "transcribe")).unwrap();
    assert_eq!(transcribe.status, StageStatus::Success);
}

#[test]
fn optional_failures_fall_back_and_still_complete() {
    let harness = Harness::new();
    let ctx = harness.create_job();
    let calls = Calls::default();

    let failed = WorkerOutcome::Failed {
        exit_code: Some(2),
        message: "model not found".to_string(),
        stderr_tail: vec!["error: model not found".to_string()],
    };
    let workers = standard_workers(&calls)
        .with("refine-vad", scripted(&calls, failed.clone()))
        .with("diarize", scripted(&calls, failed));

    let summary = harness.runner(workers).run(&ctx).unwrap();

    assert_eq!(summary.status, PipelineStatus::Completed);
    assert_eq!(
        summary.skipped,
        vec!["refine-vad", "diarize", "correct", "translate"]
    );

    let vad_output = ctx.layout.root().join("02_vad/vad.json");
    let transcribe_inputs = calls.inputs("transcribe").unwrap();
    assert_eq!(transcribe_inputs["segments"], vad_output);

    let diarize = StageManifest::load(&ctx.layout.stage_manifest(4, "diarize")).unwrap();
    assert_eq!(diarize.status, StageStatus::Skipped);
    assert_eq!(diarize.metadata["tolerated"], serde_json::json!(true));
    assert_eq!(diarize.metadata["exit_code"], serde_json::json!(2));
    assert_eq!(
        diarize.metadata["stderr_tail"],
        serde_json::json!(["error: model not found"])
    );
    assert_eq!(
        diarize.input("segments").unwrap().path,
        vad_output,
        "diarize reads refine-vad's fallback"
    );

    let manifest = PipelineManifest::load(&ctx.layout.pipeline_manifest()).unwrap();
    assert_eq!(
        manifest.summary("refine-vad").unwrap().notes.as_deref(),
        Some("exit code 2: model not found")
    );
}

#[test]
fn timed_out_refinement_resolves_to_plain_vad_output() {
    let mut harness = Harness::new();
    harness.settings.pipeline.enable_diarization = false;
    let ctx = harness.create_job();
    assert_eq!(ctx.job_id().to_string(), "20250101-001");
    assert_eq!(ctx.job.user_id, 1);

    let calls = Calls::default();
    let timed_out = WorkerOutcome::TimedOut {
        after: Duration::from_secs(5),
        stderr_tail: Vec::new(),
    };
    // Stop at transcribe to inspect the pipeline state right after the
    // tolerated timeout.
    let workers = standard_workers(&calls)
        .with("refine-vad", scripted(&calls, timed_out))
        .with("transcribe", scripted(&calls, WorkerOutcome::failed("stop here")));

    let err = harness.runner(workers).run(&ctx).unwrap_err();
    assert!(matches!(err, PipelineError::StageFailed { ref stage, .. } if stage == "transcribe"));

    let demux = StageManifest::load(&ctx.layout.stage_manifest(1, "demux")).unwrap();
    assert_eq!(demux.status, StageStatus::Success);
    assert!(ctx.layout.root().join("01_demux/audio.wav").is_file());

    let refine = StageManifest::load(&ctx.layout.stage_manifest(3, "refine-vad")).unwrap();
    assert_eq!(refine.status, StageStatus::Skipped);
    assert_eq!(refine.metadata["timed_out"], serde_json::json!(true));
    assert_eq!(refine.metadata_str("error"), Some("timed out after 5s"));

    let manifest = PipelineManifest::load(&ctx.layout.pipeline_manifest()).unwrap();
    assert_eq!(manifest.next_stage(), Some("transcribe"));
    assert_eq!(manifest.status, PipelineStatus::Failed);
    assert_eq!(
        calls.inputs("transcribe").unwrap()["segments"],
        ctx.layout.root().join("02_vad/vad.json")
    );

    // The failed job resumes at transcribe without redoing the timeout.
    let summary = harness
        .runner(standard_workers(&calls))
        .resume(&ctx, None)
        .unwrap();
    assert_eq!(summary.status, PipelineStatus::Completed);
    assert_eq!(summary.executed[0], "transcribe");
    assert_eq!(calls.count("refine-vad"), 1);
}

#[cfg(unix)]
#[test]
fn hung_optional_worker_is_killed_and_skipped() {
    let mut harness = Harness::new();
    let hung = WorkerSettings::new(["sh", "-c", "sleep 6; true"]).with_timeout(1);
    harness
        .settings
        .workers
        .insert("refine-vad".to_string(), hung.clone());
    let ctx = harness.create_job();
    let calls = Calls::default();

    let workers = standard_workers(&calls).with("refine-vad", CommandWorker::new(hung));
    let started = Instant::now();
    let summary = harness.runner(workers).run(&ctx).unwrap();

    assert!(
        started.elapsed() < Duration::from_secs(4),
        "run took {:?}",
        started.elapsed()
    );
    assert_eq!(summary.status, PipelineStatus::Completed);
    assert!(summary.skipped.contains(&"refine-vad".to_string()));

    let refine = StageManifest::load(&ctx.layout.stage_manifest(3, "refine-vad")).unwrap();
    assert_eq!(refine.status, StageStatus::Skipped);
    assert_eq!(refine.metadata["timed_out"], serde_json::json!(true));
    assert_eq!(refine.metadata_str("error"), Some("timed out after 1s"));

    assert_eq!(
        calls.inputs("transcribe").unwrap()["segments"],
        ctx.layout.root().join("02_vad/vad.json")
    );
}

#[test]
fn mandatory_failure_halts_and_records_diagnostics() {
    let harness = Harness::new();
    let ctx = harness.create_job();
    let calls = Calls::default();

    let workers = standard_workers(&calls).with(
        "vad",
        scripted(
            &calls,
            WorkerOutcome::Failed {
                exit_code: Some(137),
                message: "killed".to_string(),
                stderr_tail: vec!["out of memory".to_string()],
            },
        ),
    );

    let err = harness.runner(workers).run(&ctx).unwrap_err();
    assert!(err.to_string().contains("vad"));
    assert_eq!(calls.count("refine-vad"), 0);

    let vad = StageManifest::load(&ctx.layout.stage_manifest(2, "vad")).unwrap();
    assert_eq!(vad.status, StageStatus::Failed);
    assert_eq!(vad.metadata["exit_code"], serde_json::json!(137));
    assert_eq!(vad.metadata["timed_out"], serde_json::json!(false));
    assert_eq!(vad.metadata_str("error"), Some("exit code 137: killed"));

    let manifest = PipelineManifest::load(&ctx.layout.pipeline_manifest()).unwrap();
    assert_eq!(manifest.status, PipelineStatus::Failed);
    assert_eq!(manifest.completed, vec!["demux"]);
    assert_eq!(manifest.next_stage(), Some("vad"));
}

#[test]
fn forced_resume_reruns_from_the_named_stage() {
    let harness = Harness::new();
    let ctx = harness.create_job();
    let calls = Calls::default();
    let runner = harness.runner(standard_workers(&calls));
    runner.run(&ctx).unwrap();

    let summary = runner.resume(&ctx, Some("subtitles")).unwrap();

    assert_eq!(summary.status, PipelineStatus::Completed);
    assert_eq!(summary.executed, vec!["subtitles", "mux"]);
    assert_eq!(calls.count("subtitles"), 2);
    assert_eq!(calls.count("transcribe"), 1);
}

#[test]
fn missing_input_file_fails_the_stage() {
    let harness = Harness::new();
    let ctx = harness.create_job();
    let calls = Calls::default();

    // demux claims success but the file is gone before vad runs.
    let workers = standard_workers(&calls).with("vad", {
        let calls = calls.clone();
        let write = writer(&calls);
        move |req: &WorkerRequest| {
            let outcome = write(req);
            std::fs::remove_file(req.input("audio").unwrap()).unwrap();
            outcome
        }
    });
    harness.runner(workers).run(&ctx).unwrap_err();

    let refine = StageManifest::load(&ctx.layout.stage_manifest(3, "refine-vad")).unwrap();
    assert_eq!(refine.status, StageStatus::Skipped);
    assert!(refine.metadata_str("error").unwrap().contains("not found"));
}
