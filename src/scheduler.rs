use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Mutex;
use std::thread::JoinHandle;

use bevy::prelude::*;
use tracing::{error, info, warn};

use crate::core::case::{Case, SequenceType};
use crate::core::config::AppConfig;
use crate::core::error::{AppError, InferenceError, ModelError};
use crate::core::image::load_medical_image;
use crate::core::model::{self, window, LesionModel};
use crate::core::postproc::PredictionResults;
use crate::{AppStatus, CaseList};

/// Phases of the prediction pipeline, in order. Transitions are
/// strictly linear; there is no cancellation path once a run has
/// started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
pub enum WorkerPhase {
    #[default]
    Idle,
    Preparing,
    ModelLoading,
    Inferring,
    PostProcessing,
    Done,
    Failed,
}

/// Coarse progress report sent from the worker thread.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub phase: WorkerPhase,
    pub percent: u8,
}

/// Handles of one running prediction. The receivers are polled from
/// the UI schedule; the worker owns the sending halves.
#[derive(Debug)]
pub struct PredictionTask {
    pub case_id: String,
    pub join_handle: Option<JoinHandle<()>>,
    pub progress_rx: Mutex<Receiver<ProgressUpdate>>,
    pub result_rx: Mutex<Receiver<Result<PredictionResults, AppError>>>,
    pub progress: ProgressUpdate,
}

/// The single-slot admission gate. At most one prediction runs at a
/// time; a second start attempt is rejected while the slot is
/// occupied, never queued.
#[derive(Resource, Debug, Default)]
pub struct PredictionSlot {
    task: Option<PredictionTask>,
}

impl PredictionSlot {
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.task.is_some()
    }

    #[must_use]
    pub fn current(&self) -> Option<&PredictionTask> {
        self.task.as_ref()
    }

    /// Admits a prediction for the given case, spawning the worker
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Busy`] while a prediction is running and
    /// [`ModelError::NotFound`] when no checkpoint can be resolved.
    #[tracing::instrument(level = "info", skip(self, case, config))]
    pub fn admit(&mut self, case: &Case, config: &AppConfig) -> Result<(), AppError> {
        if self.is_busy() {
            return Err(ModelError::Busy.into());
        }
        let model_path = config.resolve_model_path()?;

        let sequence_paths: Vec<(SequenceType, PathBuf)> = case
            .files
            .iter()
            .map(|file| (file.sequence_type, file.path.clone()))
            .collect();

        let (progress_tx, progress_rx) = channel();
        let (result_tx, result_rx) = channel();
        let case_id = case.id.clone();
        let worker_config = config.clone();

        info!("Starting prediction for case {case_id}");
        let join_handle = std::thread::spawn(move || {
            run_prediction(
                &sequence_paths,
                &model_path,
                &worker_config,
                &progress_tx,
                &result_tx,
            );
        });

        self.task = Some(PredictionTask {
            case_id,
            join_handle: Some(join_handle),
            progress_rx: Mutex::new(progress_rx),
            result_rx: Mutex::new(result_rx),
            progress: ProgressUpdate {
                phase: WorkerPhase::Preparing,
                percent: 0,
            },
        });
        Ok(())
    }
}

#[allow(clippy::module_name_repetitions)]
#[derive(Debug)]
pub struct SchedulerPlugin;

impl Plugin for SchedulerPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PredictionSlot>()
            .add_systems(Update, poll_prediction);
    }
}

/// Drains the worker channels: progress updates move the displayed
/// phase along, and a final result (or error) is attached to its case
/// and frees the slot.
#[allow(clippy::needless_pass_by_value)]
#[tracing::instrument(level = "trace", skip_all)]
pub fn poll_prediction(
    mut slot: ResMut<PredictionSlot>,
    mut case_list: ResMut<CaseList>,
    mut status: ResMut<AppStatus>,
) {
    let Some(task) = slot.task.as_mut() else {
        return;
    };

    if let Ok(progress_rx) = task.progress_rx.lock() {
        while let Ok(update) = progress_rx.try_recv() {
            task.progress = update;
        }
    }

    let outcome = task
        .result_rx
        .lock()
        .map_or(Err(TryRecvError::Disconnected), |result_rx| {
            result_rx.try_recv()
        });

    match outcome {
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            status.report_error("Prediction worker terminated unexpectedly");
            finish_task(&mut slot);
        }
        Ok(Ok(results)) => {
            let case_id = task.case_id.clone();
            let lesions = results.num_lesions;
            if case_list.manager.set_prediction_results_by_id(&case_id, results) {
                status.report_message(format!(
                    "Prediction finished: {lesions} lesion(s) found"
                ));
                case_list.results_stale = true;
            } else {
                warn!("Case {case_id} was closed before its prediction finished");
                status.report_message("Prediction finished, but its case was closed");
            }
            finish_task(&mut slot);
        }
        Ok(Err(error)) => {
            status.report_error(format!("Prediction failed: {error}"));
            finish_task(&mut slot);
        }
    }
}

fn finish_task(slot: &mut PredictionSlot) {
    if let Some(mut task) = slot.task.take() {
        if let Some(join_handle) = task.join_handle.take() {
            if join_handle.join().is_err() {
                error!("Prediction worker thread panicked");
            }
        }
    }
}

/// The worker pipeline: prepare, load the model, infer, post-process.
/// Strictly linear; any failure aborts the whole run and is reported
/// as a single error. Volumes are re-read from disk so the worker
/// never shares mutable state with the UI thread.
#[tracing::instrument(level = "info", skip_all)]
pub fn run_prediction(
    sequence_paths: &[(SequenceType, PathBuf)],
    model_path: &std::path::Path,
    config: &AppConfig,
    progress_tx: &Sender<ProgressUpdate>,
    result_tx: &Sender<Result<PredictionResults, AppError>>,
) {
    let report = |phase: WorkerPhase, percent: u8| {
        let _ = progress_tx.send(ProgressUpdate { phase, percent });
    };

    let outcome = (|| -> Result<PredictionResults, AppError> {
        report(WorkerPhase::Preparing, 5);
        let t2w_path = find_sequence(sequence_paths, SequenceType::T2w)?;
        let adc_path = find_sequence(sequence_paths, SequenceType::Adc)?;
        let t2w = load_volume(t2w_path, SequenceType::T2w)?;
        let adc = load_volume(adc_path, SequenceType::Adc)?;
        let (input, geometry) = model::prepare_input(&t2w, &adc)?;
        report(WorkerPhase::ModelLoading, 30);

        let lesion_model = LesionModel::load(model_path)?;
        report(WorkerPhase::Inferring, 50);

        let logits = window::sliding_window_inference(
            &input,
            config.model.roi_size,
            config.model.overlap,
            |window_view| lesion_model.run_window(window_view),
        )?;
        report(WorkerPhase::PostProcessing, 80);

        let probability = window::lesion_probability(&logits);
        let results = PredictionResults::from_probability_map(
            probability.view(),
            &geometry,
            config.model.threshold,
            &config.severity,
        );
        report(WorkerPhase::Done, 100);
        Ok(results)
    })();

    if let Err(error) = &outcome {
        report(WorkerPhase::Failed, 100);
        error!("Prediction pipeline aborted: {error}");
    }
    let _ = result_tx.send(outcome);
}

fn find_sequence(
    sequence_paths: &[(SequenceType, PathBuf)],
    wanted: SequenceType,
) -> Result<&PathBuf, InferenceError> {
    sequence_paths
        .iter()
        .find(|(sequence, _)| *sequence == wanted)
        .map(|(_, path)| path)
        .ok_or(InferenceError::MissingSequence(wanted))
}

fn load_volume(
    path: &std::path::Path,
    sequence: SequenceType,
) -> Result<crate::core::image::ImageVolume, AppError> {
    let image = load_medical_image(path).map_err(AppError::Load)?;
    image
        .volume
        .ok_or_else(|| InferenceError::MissingVoxelData(sequence).into())
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::channel;

    use super::*;
    use crate::tests::{setup_folder, write_phantom_mha};

    fn dummy_task(case_id: &str) -> PredictionTask {
        let (_, progress_rx) = channel();
        let (_, result_rx) = channel();
        PredictionTask {
            case_id: case_id.to_string(),
            join_handle: None,
            progress_rx: Mutex::new(progress_rx),
            result_rx: Mutex::new(result_rx),
            progress: ProgressUpdate {
                phase: WorkerPhase::Inferring,
                percent: 50,
            },
        }
    }

    fn empty_case() -> Case {
        use chrono::Utc;
        Case {
            id: "case_gate".to_string(),
            name: "Case gate".to_string(),
            files: Vec::new(),
            metadata: std::collections::BTreeMap::new(),
            created_date: Utc::now(),
            modified_date: Utc::now(),
            has_changes: false,
            prediction_results: None,
        }
    }

    #[test]
    fn a_busy_slot_rejects_a_second_admission() {
        let mut slot = PredictionSlot {
            task: Some(dummy_task("case_one")),
        };

        let result = slot.admit(&empty_case(), &AppConfig::default());

        assert!(matches!(
            result,
            Err(AppError::Model(ModelError::Busy))
        ));
        // The running task is untouched by the rejection.
        assert_eq!(slot.current().unwrap().case_id, "case_one");
    }

    #[test]
    fn admission_fails_without_a_checkpoint() {
        let mut slot = PredictionSlot::default();
        let mut config = AppConfig::default();
        config.model.path = Some(PathBuf::from("definitely/missing/model.onnx"));

        let result = slot.admit(&empty_case(), &config);

        // Either the configured path or the default locations are
        // missing in the test environment.
        assert!(matches!(
            result,
            Err(AppError::Model(ModelError::NotFound(_)))
        ));
        assert!(!slot.is_busy());
    }

    #[test_log::test]
    fn worker_reports_a_missing_sequence() {
        let dir = std::env::temp_dir().join("prostalyzer_scheduler_tests");
        setup_folder(&dir).unwrap();
        let t2w = dir.join("gate_t2w.mha");
        write_phantom_mha(&t2w, false);

        let (progress_tx, progress_rx) = channel();
        let (result_tx, result_rx) = channel();
        run_prediction(
            &[(SequenceType::T2w, t2w)],
            std::path::Path::new("missing.onnx"),
            &AppConfig::default(),
            &progress_tx,
            &result_tx,
        );

        let result = result_rx.recv().unwrap();
        assert!(matches!(
            result,
            Err(AppError::Inference(InferenceError::MissingSequence(
                SequenceType::Adc
            )))
        ));
        let first = progress_rx.recv().unwrap();
        assert_eq!(first.phase, WorkerPhase::Preparing);
        assert_eq!(first.percent, 5);
    }

    #[test_log::test]
    fn worker_aborts_on_a_missing_model_after_preparing() {
        let dir = std::env::temp_dir().join("prostalyzer_scheduler_tests");
        setup_folder(&dir).unwrap();
        let t2w = dir.join("full_t2w.mha");
        let adc = dir.join("full_adc.mha");
        write_phantom_mha(&t2w, false);
        write_phantom_mha(&adc, false);

        let (progress_tx, progress_rx) = channel();
        let (result_tx, result_rx) = channel();
        run_prediction(
            &[(SequenceType::T2w, t2w), (SequenceType::Adc, adc)],
            std::path::Path::new("missing.onnx"),
            &AppConfig::default(),
            &progress_tx,
            &result_tx,
        );

        let result = result_rx.recv().unwrap();
        assert!(matches!(
            result,
            Err(AppError::Model(ModelError::NotFound(_)))
        ));
        let phases: Vec<WorkerPhase> = progress_rx.try_iter().map(|update| update.phase).collect();
        assert_eq!(
            phases,
            vec![
                WorkerPhase::Preparing,
                WorkerPhase::ModelLoading,
                WorkerPhase::Failed
            ]
        );
    }
}
