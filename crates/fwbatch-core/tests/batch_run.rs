//! End-to-end batch runs against a scripted in-memory sandbox.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use fwbatch_core::{
    Batch, BatchConfig, BatchError, Callbacks, Device, DeviceCore, DeviceSandbox, DeviceTraits,
    EventSender, Firmware, FirmwareKind, OperationDescriptor, OperationKind, OperationOutput,
    OperationState, Progress, ProtectionLevel, ResetKind, SandboxError, SandboxEvent, TaskBegin,
    TaskEnd, TaskError, TaskInfo, TaskResult,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// What the sandbox does for one operation of the batch.
#[derive(Debug, Clone)]
enum Step {
    Succeed(Option<Value>),
    Fail { code: i64, message: &'static str },
    HangUntilCancelled,
    DropConnection,
    /// Return successfully without ending the operation.
    StopEarly,
}

#[derive(Default)]
struct ScriptedSandbox {
    steps: Vec<Step>,
    reject_command: Option<&'static str>,
    /// Send every event without yielding to the executor in between.
    eager: bool,
    /// Added to the index when tagging task begins with an operation id.
    id_offset: usize,
    token: Mutex<Option<CancellationToken>>,
    generated: Mutex<Vec<(String, DeviceCore, Vec<String>)>>,
    executed: Mutex<Vec<(String, Value)>>,
    firmware_present: Mutex<Vec<bool>>,
}

impl ScriptedSandbox {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    fn rejecting(command: &'static str) -> Self {
        Self {
            reject_command: Some(command),
            ..Default::default()
        }
    }

    fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    fn mistagged(mut self) -> Self {
        self.id_offset = 1;
        self
    }

    fn received_token(&self) -> CancellationToken {
        self.token.lock().unwrap().clone().expect("batch executed")
    }

    fn generated_count(&self) -> usize {
        self.generated.lock().unwrap().len()
    }

    fn executed_count(&self) -> usize {
        self.executed.lock().unwrap().len()
    }
}

fn task(index: usize, command: &str) -> TaskInfo {
    TaskInfo {
        id: (index + 1).to_string(),
        description: format!("{command} on device"),
        name: command.to_string(),
        data: None,
    }
}

#[async_trait]
impl DeviceSandbox for ScriptedSandbox {
    async fn generate_descriptor(
        &self,
        command: &str,
        core: DeviceCore,
        args: &[String],
    ) -> Result<OperationDescriptor, SandboxError> {
        self.generated
            .lock()
            .unwrap()
            .push((command.to_string(), core, args.to_vec()));
        tokio::task::yield_now().await;

        if self.reject_command == Some(command) {
            return Err(SandboxError::Rejected {
                code: 22,
                message: format!("cannot generate {command}"),
            });
        }

        let descriptor = json!({ "command": command, "core": core.as_str(), "args": args });
        Ok(OperationDescriptor::try_from(descriptor)?)
    }

    async fn execute_batch(
        &self,
        serial_number: &str,
        batch_json: &str,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<(), SandboxError> {
        let batch: Value = serde_json::from_str(batch_json).map_err(|e| {
            SandboxError::Transport(format!("bad batch json: {e}"))
        })?;
        self.executed
            .lock()
            .unwrap()
            .push((serial_number.to_string(), batch.clone()));
        *self.token.lock().unwrap() = Some(cancel.clone());

        let operations = batch["operations"].as_array().cloned().unwrap_or_default();
        for (index, operation) in operations.iter().enumerate() {
            let command = operation["command"].as_str().unwrap_or_default().to_string();
            if command == "program" {
                let args: Vec<&str> = operation["args"]
                    .as_array()
                    .map(|a| a.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                let present = args
                    .iter()
                    .position(|a| *a == "--firmware")
                    .and_then(|i| args.get(i + 1))
                    .is_some_and(|path| Path::new(path).exists());
                self.firmware_present.lock().unwrap().push(present);
            }

            let info = task(index, &command);
            let _ = events.send(SandboxEvent::TaskBegin(TaskBegin {
                task: info.clone(),
                operation_id: Some((index + self.id_offset).to_string()),
            }));
            let _ = events.send(SandboxEvent::Progress {
                progress: Progress {
                    progress_percentage: 50.0,
                    ..Default::default()
                },
                task: Some(info.clone()),
            });
            if !self.eager {
                tokio::task::yield_now().await;
            }

            let step = self.steps.get(index).cloned().unwrap_or(Step::Succeed(None));
            let end = match step {
                Step::Succeed(data) => TaskEnd {
                    task: info,
                    result: TaskResult::Success,
                    error: None,
                    message: None,
                    data,
                },
                Step::Fail { code, message } => TaskEnd {
                    task: info,
                    result: TaskResult::Fail,
                    error: Some(TaskError {
                        code,
                        description: None,
                    }),
                    message: Some(message.to_string()),
                    data: None,
                },
                Step::HangUntilCancelled => {
                    cancel.cancelled().await;
                    return Err(SandboxError::Cancelled);
                }
                Step::DropConnection => {
                    return Err(SandboxError::Transport("sandbox exited".into()));
                }
                Step::StopEarly => return Ok(()),
            };
            let _ = events.send(SandboxEvent::TaskEnd(end));
        }

        Ok(())
    }
}

type Log = Arc<Mutex<Vec<String>>>;

fn recorded<T: 'static>(name: &'static str, log: &Log) -> Callbacks<T> {
    let (b, p, e, x) = (
        Arc::clone(log),
        Arc::clone(log),
        Arc::clone(log),
        Arc::clone(log),
    );
    Callbacks::new()
        .on_task_begin(move |_| b.lock().unwrap().push(format!("{name}:begin")))
        .on_progress(move |progress, _| {
            p.lock()
                .unwrap()
                .push(format!("{name}:progress:{}", progress.progress_percentage))
        })
        .on_task_end(move |end: &TaskEnd<T>| {
            e.lock().unwrap().push(format!("{name}:end:{}", end.result))
        })
        .on_exception(move |err| x.lock().unwrap().push(format!("{name}:exception:{err}")))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn device() -> Device {
    Device::new(1, "000683001234")
}

fn staging_config(dir: &Path) -> BatchConfig {
    BatchConfig::builder()
        .staging_dir(dir)
        .build()
        .expect("valid config")
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test]
async fn test_results_follow_enqueue_order() {
    let sandbox = Arc::new(ScriptedSandbox::new(vec![
        Step::Succeed(None),
        Step::Succeed(None),
        Step::Succeed(None),
        Step::Succeed(Some(json!({ "protectionStatus": "NRFDL_PROTECTION_STATUS_NONE" }))),
    ]));

    let outputs = Batch::new(sandbox.clone())
        .erase(DeviceCore::Application, None)
        .reset(DeviceCore::Network, Some(ResetKind::ResetPin), None)
        .recover(DeviceCore::Modem, None)
        .get_protection_status(DeviceCore::Application, None)
        .run(&device(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outputs.len(), 4);
    assert_eq!(outputs[0], OperationOutput::Erase);
    assert_eq!(outputs[1], OperationOutput::Reset);
    assert_eq!(outputs[2], OperationOutput::Recover);
    match &outputs[3] {
        OperationOutput::ProtectionStatus(status) => {
            assert_eq!(status.protection_status, ProtectionLevel::None)
        }
        other => panic!("unexpected output: {other:?}"),
    }

    let executed = sandbox.executed.lock().unwrap();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].0, "000683001234");
    let ops = executed[0].1["operations"].as_array().unwrap();
    let ids: Vec<&str> = ops.iter().map(|o| o["operationId"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["0", "1", "2", "3"]);
    assert_eq!(ops[1]["command"], "reset");
    assert_eq!(ops[1]["core"], "Network");
    assert_eq!(ops[1]["args"], json!(["--reset-kind", "RESET_PIN"]));
    assert_eq!(ops[3]["command"], "protection-get");
}

#[tokio::test]
async fn test_callbacks_receive_lifecycle_in_order() {
    let log: Log = Arc::default();
    let sandbox = Arc::new(ScriptedSandbox::new(Vec::new()));

    Batch::new(sandbox)
        .erase(DeviceCore::Application, Some(recorded("erase", &log)))
        .reset(DeviceCore::Application, None, Some(recorded("reset", &log)))
        .run(&device(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        entries(&log),
        vec![
            "erase:begin",
            "erase:progress:50",
            "erase:end:success",
            "reset:begin",
            "reset:progress:50",
            "reset:end:success",
        ]
    );
}

#[tokio::test]
async fn test_missing_serial_number_skips_sandbox() {
    let sandbox = Arc::new(ScriptedSandbox::new(Vec::new()));
    let device = Device {
        serial_number: None,
        ..device()
    };

    let result = Batch::new(sandbox.clone())
        .erase(DeviceCore::Application, None)
        .run(&device, CancellationToken::new())
        .await;

    assert!(matches!(result, Err(BatchError::MissingSerialNumber)));
    assert_eq!(sandbox.generated_count(), 0);
    assert_eq!(sandbox.executed_count(), 0);
}

#[tokio::test]
async fn test_descriptor_failure_prevents_submission() {
    let sandbox = Arc::new(ScriptedSandbox::rejecting("fw-read"));

    let result = Batch::new(sandbox.clone())
        .erase(DeviceCore::Application, None)
        .read_firmware(DeviceCore::Application, None)
        .get_core_info(DeviceCore::Application, None)
        .run(&device(), CancellationToken::new())
        .await;

    match result {
        Err(BatchError::Build {
            operation_id,
            command,
            source: SandboxError::Rejected { code, .. },
        }) => {
            assert_eq!(operation_id, 1);
            assert_eq!(command, "fw-read");
            assert_eq!(code, 22);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(sandbox.executed_count(), 0);
}

#[tokio::test]
async fn test_program_buffer_staged_and_removed() {
    let staging = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(ScriptedSandbox::new(Vec::new()));
    let traits = DeviceTraits {
        jlink: true,
        ..Default::default()
    };

    let outputs = Batch::with_config(sandbox.clone(), staging_config(staging.path()))
        .erase(DeviceCore::Application, None)
        .program(
            Firmware::buffer(b":020000040000FA\n:00000001FF\n".to_vec(), FirmwareKind::Hex),
            DeviceCore::Application,
            None,
            Some(&traits),
            None,
        )
        .run(&device(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outputs, vec![OperationOutput::Erase, OperationOutput::Program]);
    assert_eq!(*sandbox.firmware_present.lock().unwrap(), vec![true]);
    assert!(dir_is_empty(staging.path()));

    let generated = sandbox.generated.lock().unwrap();
    let (command, core, args) = &generated[1];
    assert_eq!(command, "program");
    assert_eq!(*core, DeviceCore::Application);
    assert_eq!(args[0], "--firmware");
    assert!(args[1].ends_with(".hex"));
    assert!(Path::new(&args[1]).starts_with(staging.path()));
    assert_eq!(&args[2..], ["--traits", "jlink"]);
}

#[tokio::test]
async fn test_program_path_passed_through() {
    let sandbox = Arc::new(ScriptedSandbox::new(Vec::new()));

    Batch::new(sandbox.clone())
        .program(
            Firmware::Path("/opt/images/app.zip".into()),
            DeviceCore::Network,
            None,
            None,
            None,
        )
        .run(&device(), CancellationToken::new())
        .await
        .unwrap();

    let generated = sandbox.generated.lock().unwrap();
    assert_eq!(generated[0].2, vec!["--firmware", "/opt/images/app.zip"]);
}

#[tokio::test]
async fn test_program_failure_aggregates_and_notifies() {
    let staging = tempfile::tempdir().unwrap();
    let log: Log = Arc::default();
    let sandbox = Arc::new(ScriptedSandbox::new(vec![
        Step::Succeed(None),
        Step::Fail {
            code: 3,
            message: "verify failed",
        },
    ]));

    let result = Batch::with_config(sandbox, staging_config(staging.path()))
        .erase(DeviceCore::Application, Some(recorded("erase", &log)))
        .program(
            Firmware::buffer(vec![0u8; 64], FirmwareKind::Zip),
            DeviceCore::Application,
            None,
            None,
            Some(recorded("program", &log)),
        )
        .run(&device(), CancellationToken::new())
        .await;

    let err = result.unwrap_err();
    match &err {
        BatchError::TaskFailures(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].operation_id, 1);
            assert_eq!(failures[0].command, "program");
            assert_eq!(failures[0].code, Some(3));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("program"));
    assert!(err.to_string().contains("verify failed"));

    let log = entries(&log);
    assert!(log.contains(&"erase:end:success".to_string()));
    assert!(log.contains(&"program:end:fail".to_string()));
    assert!(log
        .iter()
        .any(|l| l.starts_with("program:exception:batch failed")));
    assert!(!log.iter().any(|l| l.starts_with("erase:exception")));
    assert!(dir_is_empty(staging.path()));
}

#[tokio::test]
async fn test_read_firmware_decodes_base64() {
    let image = vec![0x00, 0x20, 0x00, 0x20, 0xff];
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let sandbox = Arc::new(ScriptedSandbox::new(vec![Step::Succeed(Some(json!({
        "buffer": general_purpose::STANDARD.encode(&image)
    })))]));

    let outputs = Batch::new(sandbox)
        .read_firmware(
            DeviceCore::Application,
            Some(Callbacks::new().on_task_end(move |end: &TaskEnd<Vec<u8>>| {
                *sink.lock().unwrap() = end.data.clone();
            })),
        )
        .run(&device(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outputs[0].as_firmware(), Some(image.as_slice()));
    assert_eq!(outputs[0].kind(), OperationKind::ReadFirmware);
    assert_eq!(*seen.lock().unwrap(), Some(image));
}

#[tokio::test]
async fn test_failed_read_reported_as_exception() {
    let log: Log = Arc::default();
    let sandbox = Arc::new(ScriptedSandbox::new(vec![Step::Fail {
        code: 9,
        message: "readback protected",
    }]));

    let result = Batch::new(sandbox)
        .read_firmware(DeviceCore::Application, Some(recorded("read", &log)))
        .run(&device(), CancellationToken::new())
        .await;

    assert!(matches!(result, Err(BatchError::TaskFailures(_))));
    assert_eq!(
        entries(&log),
        vec!["read:begin", "read:progress:50", "read:exception:Read failed"]
    );
}

#[tokio::test]
async fn test_read_without_data_reported_as_exception() {
    let log: Log = Arc::default();
    let sandbox = Arc::new(ScriptedSandbox::new(vec![Step::Succeed(None)]));

    let result = Batch::new(sandbox)
        .read_firmware(DeviceCore::Application, Some(recorded("read", &log)))
        .run(&device(), CancellationToken::new())
        .await;

    assert!(result.is_err());
    let log = entries(&log);
    assert_eq!(log.last().map(String::as_str), Some("read:exception:Read failed"));
    assert!(!log.iter().any(|l| l.starts_with("read:end")));
}

#[tokio::test]
async fn test_collect_groups_trailing_results() {
    let groups = Arc::new(Mutex::new(Vec::new()));
    let (first, second) = (Arc::clone(&groups), Arc::clone(&groups));
    let sandbox = Arc::new(ScriptedSandbox::new(vec![
        Step::Succeed(None),
        Step::Succeed(Some(json!({ "codeSize": 1048576 }))),
        Step::Succeed(None),
    ]));

    Batch::new(sandbox)
        .collect(5, |_| panic!("collect on an empty batch must never fire"))
        .erase(DeviceCore::Application, None)
        .get_core_info(DeviceCore::Application, None)
        .collect(2, move |ends| {
            first.lock().unwrap().push(
                ends.iter()
                    .map(|e| e.data.as_ref().map(|d| d.kind()))
                    .collect::<Vec<_>>(),
            )
        })
        .reset(DeviceCore::Application, None, None)
        .collect(10, move |ends| {
            second
                .lock()
                .unwrap()
                .push(ends.iter().map(|e| e.data.as_ref().map(|d| d.kind())).collect())
        })
        .run(&device(), CancellationToken::new())
        .await
        .unwrap();

    let groups = groups.lock().unwrap();
    assert_eq!(
        *groups,
        vec![
            vec![Some(OperationKind::Erase), Some(OperationKind::CoreInfo)],
            vec![
                Some(OperationKind::Erase),
                Some(OperationKind::CoreInfo),
                Some(OperationKind::Reset)
            ],
        ]
    );
}

#[tokio::test]
async fn test_cancellation_notifies_in_flight_operation() {
    let log: Log = Arc::default();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let sandbox = Arc::new(ScriptedSandbox::new(vec![
        Step::Succeed(None),
        Step::HangUntilCancelled,
    ]));

    let program_log = Arc::clone(&log);
    let program_callbacks = recorded::<()>("program", &log).on_task_begin(move |_| {
        program_log.lock().unwrap().push("program:begin".into());
        trigger.cancel();
    });

    let staging = tempfile::tempdir().unwrap();
    let result = Batch::with_config(sandbox, staging_config(staging.path()))
        .erase(DeviceCore::Application, Some(recorded("erase", &log)))
        .program(
            Firmware::buffer(vec![1, 2, 3], FirmwareKind::Hex),
            DeviceCore::Application,
            None,
            None,
            Some(program_callbacks),
        )
        .run(&device(), cancel)
        .await;

    assert!(matches!(result, Err(BatchError::Cancelled)));
    let log = entries(&log);
    assert_eq!(
        log.iter().filter(|l| l.as_str() == "erase:end:success").count(),
        1
    );
    assert!(!log.iter().any(|l| l.starts_with("erase:exception")));
    assert_eq!(
        log.last().map(String::as_str),
        Some("program:exception:batch cancelled")
    );
    assert!(dir_is_empty(staging.path()));
}

#[tokio::test]
async fn test_transport_failure_notifies_in_flight_operation() {
    let log: Log = Arc::default();
    let sandbox = Arc::new(ScriptedSandbox::new(vec![
        Step::Succeed(Some(json!({ "imageInfoList": [] }))),
        Step::DropConnection,
    ]));

    let result = Batch::new(sandbox)
        .get_fw_info(DeviceCore::Application, Some(recorded("fw", &log)))
        .get_device_info(DeviceCore::Application, Some(recorded("device", &log)))
        .run(&device(), CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(BatchError::Sandbox(SandboxError::Transport(_)))
    ));
    let log = entries(&log);
    assert!(log.contains(&"fw:end:success".to_string()));
    assert_eq!(
        log.last().map(String::as_str),
        Some("device:exception:sandbox error: transport failed: sandbox exited")
    );
}

#[tokio::test]
async fn test_staged_file_removed_when_build_fails() {
    let staging = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(ScriptedSandbox::rejecting("erase"));

    let result = Batch::with_config(sandbox, staging_config(staging.path()))
        .program(
            Firmware::buffer(vec![7; 16], FirmwareKind::Hex),
            DeviceCore::Application,
            None,
            None,
            None,
        )
        .erase(DeviceCore::Application, None)
        .run(&device(), CancellationToken::new())
        .await;

    assert!(matches!(result, Err(BatchError::Build { operation_id: 1, .. })));
    assert!(dir_is_empty(staging.path()));
}

#[tokio::test]
async fn test_staging_failure_fails_run() {
    let staging = tempfile::tempdir().unwrap();
    let missing = staging.path().join("does-not-exist");
    let sandbox = Arc::new(ScriptedSandbox::new(Vec::new()));

    let batch = Batch::with_config(sandbox.clone(), staging_config(&missing)).program(
        Firmware::buffer(vec![0; 4], FirmwareKind::Hex),
        DeviceCore::Application,
        None,
        None,
        None,
    );
    assert_eq!(batch.len(), 1);

    let result = batch.run(&device(), CancellationToken::new()).await;
    assert!(matches!(result, Err(BatchError::Staging(_))));
    assert_eq!(sandbox.executed_count(), 0);
}

#[tokio::test]
async fn test_empty_batch_runs() {
    let sandbox = Arc::new(ScriptedSandbox::new(Vec::new()));

    let outputs = Batch::new(sandbox.clone())
        .run(&device(), CancellationToken::new())
        .await
        .unwrap();

    assert!(outputs.is_empty());
    assert_eq!(
        sandbox.executed.lock().unwrap()[0].1,
        json!({ "operations": [] })
    );
}

#[tokio::test]
async fn test_events_queued_before_sandbox_failure_are_dispatched() {
    let log: Log = Arc::default();
    let sandbox = Arc::new(
        ScriptedSandbox::new(vec![Step::Succeed(None), Step::DropConnection]).eager(),
    );

    let result = Batch::new(sandbox)
        .erase(DeviceCore::Application, Some(recorded("erase", &log)))
        .recover(DeviceCore::Application, Some(recorded("recover", &log)))
        .run(&device(), CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(BatchError::Sandbox(SandboxError::Transport(_)))
    ));
    let log = entries(&log);
    assert!(log.contains(&"erase:end:success".to_string()));
    assert!(!log.iter().any(|l| l.starts_with("erase:exception")));
    assert_eq!(
        log.last().map(String::as_str),
        Some("recover:exception:sandbox error: transport failed: sandbox exited")
    );
}

#[tokio::test]
async fn test_eager_sandbox_success_dispatches_everything() {
    let log: Log = Arc::default();
    let sandbox = Arc::new(ScriptedSandbox::new(Vec::new()).eager());

    let outputs = Batch::new(sandbox)
        .erase(DeviceCore::Application, Some(recorded("erase", &log)))
        .reset(DeviceCore::Application, None, Some(recorded("reset", &log)))
        .run(&device(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outputs, vec![OperationOutput::Erase, OperationOutput::Reset]);
    assert_eq!(entries(&log).len(), 6);
}

#[tokio::test]
async fn test_mistagged_begin_rejected_when_verifying() {
    let log: Log = Arc::default();
    let cancel = CancellationToken::new();
    let sandbox = Arc::new(ScriptedSandbox::new(vec![Step::HangUntilCancelled]).mistagged());
    let config = BatchConfig::builder()
        .verify_operation_ids(true)
        .build()
        .unwrap();

    let result = Batch::with_config(sandbox.clone(), config)
        .erase(DeviceCore::Application, Some(recorded("erase", &log)))
        .run(&device(), cancel.clone())
        .await;

    match result {
        Err(BatchError::OutOfOrder { expected, actual }) => {
            assert_eq!(expected, 0);
            assert_eq!(actual, "1");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(entries(&log)
        .last()
        .is_some_and(|l| l.starts_with("erase:exception:out-of-order task event")));
    // The sandbox is told to stop; the caller's token is left alone.
    assert!(sandbox.received_token().is_cancelled());
    assert!(!cancel.is_cancelled());
}

#[tokio::test]
async fn test_mistagged_begin_tolerated_by_default() {
    let sandbox = Arc::new(ScriptedSandbox::new(Vec::new()).mistagged());

    let outputs = Batch::new(sandbox.clone())
        .erase(DeviceCore::Application, None)
        .run(&device(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outputs, vec![OperationOutput::Erase]);
    assert!(!sandbox.received_token().is_cancelled());
}

#[tokio::test]
async fn test_sandbox_returning_early_is_incomplete() {
    let log: Log = Arc::default();
    let sandbox = Arc::new(ScriptedSandbox::new(vec![Step::Succeed(None), Step::StopEarly]));

    let result = Batch::new(sandbox)
        .erase(DeviceCore::Application, Some(recorded("erase", &log)))
        .program(
            Firmware::Path("/opt/images/app.hex".into()),
            DeviceCore::Application,
            None,
            None,
            Some(recorded("program", &log)),
        )
        .run(&device(), CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(BatchError::Incomplete {
            expected: 2,
            completed: 1
        })
    ));
    assert_eq!(
        entries(&log).last().map(String::as_str),
        Some("program:exception:batch incomplete: 1 of 2 operations reported a result")
    );
}

#[tokio::test]
async fn test_invalid_config_rejected_before_sandbox() {
    let sandbox = Arc::new(ScriptedSandbox::new(Vec::new()));
    let config = BatchConfig {
        staging_attempts: 0,
        ..BatchConfig::default()
    };

    let result = Batch::with_config(sandbox.clone(), config)
        .erase(DeviceCore::Application, None)
        .run(&device(), CancellationToken::new())
        .await;

    assert!(matches!(result, Err(BatchError::InvalidConfig(_))));
    assert_eq!(sandbox.generated_count(), 0);
    assert_eq!(sandbox.executed_count(), 0);
}

#[tokio::test]
async fn test_state_changes_reported_during_run() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sandbox = Arc::new(ScriptedSandbox::new(vec![
        Step::Succeed(None),
        Step::Fail {
            code: 4,
            message: "locked",
        },
    ]));

    let result = Batch::new(sandbox)
        .erase(DeviceCore::Application, None)
        .recover(DeviceCore::Application, None)
        .on_state_change(move |index, state| sink.lock().unwrap().push((index, state)))
        .run(&device(), CancellationToken::new())
        .await;

    assert!(matches!(result, Err(BatchError::TaskFailures(_))));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (0, OperationState::DescriptorPending),
            (1, OperationState::DescriptorPending),
            (0, OperationState::Ready),
            (1, OperationState::Ready),
            (0, OperationState::Running),
            (0, OperationState::Completed),
            (1, OperationState::Running),
            (1, OperationState::Failed),
        ]
    );
}
