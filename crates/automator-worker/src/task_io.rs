//! Task input and result output for the worker process.

use std::io::{Read, Write};
use std::path::Path;

use node_automator::{Error, Result, Task, TaskResult};

/// Read a task from `path`, or stdin when the path is absent or `-`.
pub fn read_task(path: Option<&Path>) -> Result<Task> {
    let raw = match path {
        Some(p) if p != Path::new("-") => std::fs::read_to_string(p)?,
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    parse_task(&raw)
}

pub fn parse_task(raw: &str) -> Result<Task> {
    serde_json::from_str(raw).map_err(|e| Error::Binding(e.to_string()))
}

/// Write the result as one JSON document followed by a newline.
pub fn write_result(out: &mut impl Write, result: &TaskResult, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(result)
    } else {
        serde_json::to_string(result)
    }
    .map_err(|e| Error::Unexpected(format!("serialize result: {e}")))?;
    writeln!(out, "{json}")?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_automator::{Operation, TaskOutput};

    #[test]
    fn reads_task_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.json");
        std::fs::write(
            &path,
            r#"{"operation":"delete","providerId":"srv-9","providerFields":{"api_token":"t"}}"#,
        )
        .unwrap();

        let task = read_task(Some(&path)).unwrap();
        assert_eq!(task.operation, Operation::Delete);
        assert_eq!(task.provider_id.as_deref(), Some("srv-9"));
    }

    #[test]
    fn malformed_task_is_a_binding_error() {
        let err = parse_task("{\"operation\":").unwrap_err();
        assert!(err.to_string().starts_with("invalid task"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_task(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn result_is_one_json_line() {
        let mut out = Vec::new();
        write_result(&mut out, &TaskResult::success(TaskOutput::default()), false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "{\"status\":0,\"result\":{}}\n");
    }
}
