//! End-to-end flows against a scripted stand-in for DISM.

use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use winsxs_cleanup::config::ToolCommand;
use winsxs_cleanup::{
    privilege, CleanupError, Config, ConfirmInput, ConfirmationPrompt, GateState, LineEvent,
    ReportEngine, RunObserver,
};

#[derive(Default)]
struct Recorder {
    statuses: Vec<String>,
    shown: Vec<String>,
    hidden: Vec<String>,
    progress: Vec<u8>,
}

impl RunObserver for Recorder {
    fn on_status(&mut self, message: &str) {
        self.statuses.push(message.to_string());
    }

    fn on_line(&mut self, line: &LineEvent, shown: bool) {
        if shown {
            self.shown.push(line.text.clone());
        } else {
            self.hidden.push(line.text.clone());
        }
    }

    fn on_progress(&mut self, value: u8) {
        self.progress.push(value);
    }
}

fn fake_tool(analyze_script: &str, cleanup_script: &str) -> Config {
    Config {
        tool: ToolCommand {
            program: "sh".to_string(),
            analyze_args: vec!["-c".to_string(), analyze_script.to_string()],
            cleanup_args: vec!["-c".to_string(), cleanup_script.to_string()],
            reset_base_flag: "/ResetBase".to_string(),
        },
        require_elevation: false,
        tick_interval_ms: 50,
        stall_threshold_ms: 100,
        ..Default::default()
    }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

fn analyze_with_marker(marker: &Path) -> String {
    format!(
        "echo 'Deployment Image Servicing and Management tool'; \
         echo '[==========================100.0%==========================]'; \
         if [ -f '{0}' ]; then echo 'Actual Size of Component Store : 10.74 GB'; \
         else echo 'Actual Size of Component Store : 12.03 GB'; fi; \
         echo 'Reclaimable Packages : 4.51 GB'",
        marker.display()
    )
}

#[cfg(unix)]
#[tokio::test]
async fn test_analysis_reports_upper_bound_and_before() {
    let config = fake_tool(
        "printf '%s\\n' \
         'Deployment Image Servicing and Management tool' \
         'Version: 10.0.19041.3636' \
         '[=====                      10.0%                          ]' \
         '[==========================100.0%==========================]' \
         'Reclaimable Packages : 4.51 GB' \
         'Actual size of component store : 12.03 GB' \
         'The operation completed successfully.'",
        "true",
    );
    let mut engine = ReportEngine::new(config);
    let mut recorder = Recorder::default();
    let cancel = CancellationToken::new();

    let analysis = engine.analyze(&cancel, &mut recorder).await.unwrap();

    assert_eq!(analysis.run.exit_code, 0);
    assert!(approx(analysis.upper_bound.mb(), 4618.24));
    assert!(approx(analysis.actual_before.mb(), 12318.72));
    assert_eq!(analysis.run.lines.len(), 7);

    let summary = engine.report().summary();
    assert_eq!(summary.expected, "4.51 GB (estimated 923.6 MB ~ 1.80 GB, heuristic)");
    assert_eq!(summary.before, "12.03 GB");
    assert_eq!(summary.after, "-");
    assert_eq!(summary.saved, "-");

    // bars and banners stay out of the live view, never out of the transcript
    assert_eq!(recorder.hidden.len(), 4);
    assert!(recorder.shown.contains(&"Reclaimable Packages : 4.51 GB".to_string()));
    assert!(engine.transcript().as_str().contains("100.0%"));
    assert!(engine.transcript().as_str().contains("(Exit code: 0)"));

    assert!(recorder.progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(recorder.progress.last(), Some(&100));
}

#[cfg(unix)]
#[tokio::test]
async fn test_cleanup_measures_real_savings() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let marker = temp_dir.path().join("cleaned");
    let config = fake_tool(
        &analyze_with_marker(&marker),
        &format!(
            "echo '[=====     50.0%     ]'; touch '{}'; echo 'The operation completed successfully.'",
            marker.display()
        ),
    );
    let mut engine = ReportEngine::new(config);
    let mut recorder = Recorder::default();
    let cancel = CancellationToken::new();

    engine.analyze(&cancel, &mut recorder).await.unwrap();
    let outcome = engine.cleanup(false, true, &cancel, &mut recorder).await.unwrap();

    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.reanalysis.is_some());
    assert!(approx(outcome.actual_after.unwrap().mb(), 10997.76));
    assert!(approx(outcome.saved_mb.unwrap(), 1320.96));

    assert_eq!(
        engine.report().savings_label(),
        "1.29 GB (before 12.03 GB → after 10.74 GB)"
    );
    assert!(recorder
        .statuses
        .iter()
        .any(|s| s.contains("Real savings: 1.29 GB")));
    assert_eq!(recorder.progress.last(), Some(&100));
}

#[cfg(unix)]
#[tokio::test]
async fn test_cleanup_without_baseline_has_no_savings() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let marker = temp_dir.path().join("cleaned");
    let config = fake_tool(
        &analyze_with_marker(&marker),
        &format!("touch '{}'", marker.display()),
    );
    let mut engine = ReportEngine::new(config);
    let mut recorder = Recorder::default();
    let cancel = CancellationToken::new();

    let outcome = engine.cleanup(false, true, &cancel, &mut recorder).await.unwrap();

    assert!(outcome.actual_after.is_some());
    assert_eq!(outcome.saved_mb, None);
    assert_eq!(engine.report().summary().after, "10.74 GB");
    assert_eq!(engine.report().summary().saved, "-");
    assert!(recorder.statuses.iter().any(|s| s.contains("not available")));
}

#[cfg(unix)]
#[tokio::test]
async fn test_reset_base_flag_reaches_the_tool() {
    // sh -c puts the first extra argument in $0
    let config = fake_tool("true", "echo \"flag=$0\"; exit 2");
    let mut engine = ReportEngine::new(config);
    let mut recorder = Recorder::default();
    let cancel = CancellationToken::new();

    let outcome = engine.cleanup(true, false, &cancel, &mut recorder).await.unwrap();

    assert!(outcome.reset_base);
    assert_eq!(outcome.exit_code, 2);
    assert!(outcome.reanalysis.is_none());
    assert!(recorder.shown.contains(&"flag=/ResetBase".to_string()));
    assert!(recorder
        .statuses
        .iter()
        .any(|s| s.contains("ResetBase finished (Exit code: 2)")));
}

#[cfg(unix)]
#[tokio::test]
async fn test_analysis_without_upper_bound_is_informational() {
    let config = fake_tool("echo 'Error: 87'; echo 'unknown option' >&2; exit 87", "true");
    let mut engine = ReportEngine::new(config);
    let mut recorder = Recorder::default();
    let cancel = CancellationToken::new();

    let analysis = engine.analyze(&cancel, &mut recorder).await.unwrap();

    assert_eq!(analysis.run.exit_code, 87);
    assert!(!analysis.upper_bound.is_known());
    assert!(engine.report().expected().is_none());
    assert!(recorder.statuses.iter().any(|s| s.contains("already optimized")));
    assert!(recorder.shown.contains(&"unknown option".to_string()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_silent_tool_still_shows_progress() {
    let config = fake_tool("sleep 1; echo done", "true");
    let mut engine = ReportEngine::new(config);
    let mut recorder = Recorder::default();
    let cancel = CancellationToken::new();

    engine.analyze(&cancel, &mut recorder).await.unwrap();

    assert!(recorder.progress.iter().any(|v| (1..=90).contains(v)));
    assert!(recorder.progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(recorder.progress.last(), Some(&100));
}

#[cfg(unix)]
#[tokio::test]
async fn test_every_run_completes_its_progress() {
    let config = fake_tool("echo 'Actual Size of Component Store : 1.00 GB'", "echo cleaned");
    let mut engine = ReportEngine::new(config);
    let mut recorder = Recorder::default();
    let cancel = CancellationToken::new();

    engine.cleanup(false, true, &cancel, &mut recorder).await.unwrap();

    // cleanup run, then the re-analysis starting again from 0
    let completions: Vec<usize> = recorder
        .progress
        .iter()
        .enumerate()
        .filter(|(_, v)| **v == 100)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(completions.len(), 2);
    assert!(recorder.progress[completions[0]..completions[1]].contains(&0));
    assert_eq!(recorder.progress.last(), Some(&100));
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancel_during_cleanup() {
    let config = fake_tool("true", "echo started; sleep 30");
    let mut engine = ReportEngine::new(config);
    let mut recorder = Recorder::default();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        engine.cleanup(false, true, &cancel, &mut recorder),
    )
    .await
    .expect("cancellation must not hang");

    assert!(matches!(result, Err(CleanupError::Cancelled)));
    assert_eq!(recorder.progress.last(), Some(&0));
}

#[tokio::test]
async fn test_cleanup_fails_closed_without_elevation() {
    let engine = ReportEngine::new(Config::default());
    match engine.ensure_elevated() {
        Ok(()) => assert!(privilege::is_elevated()),
        Err(e) => {
            assert!(matches!(e, CleanupError::NotElevated));
            assert!(!privilege::is_elevated());
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_reset_base_confirmation_countdown() {
    let (tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();

    tokio::spawn(async move {
        // 3 seconds left on the countdown
        tokio::time::sleep(Duration::from_millis(2100)).await;
        tx.send(ConfirmInput::Acknowledge(true)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(ConfirmInput::Confirm).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(ConfirmInput::Confirm).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let mut states = Vec::new();
    let confirmed = ConfirmationPrompt::new(5)
        .run(rx, &cancel, |gate| states.push(gate.state()))
        .await;

    assert!(confirmed);
    let unlocked_at = states.iter().position(|s| *s == GateState::Unlocked).unwrap();
    assert!(states[..unlocked_at]
        .iter()
        .all(|s| matches!(s, GateState::Locked { .. })));
    assert!(states.contains(&GateState::Locked { seconds_remaining: 3 }));
}
