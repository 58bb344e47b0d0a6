//! Logical path layout of the artifact store.

/// Storage path of a content-addressed package.
pub fn package_path(hash: &str) -> String {
    format!("packages/{hash}")
}

/// Storage path of a per-task output file.
pub fn task_output_path(task_uuid: &str, name: &str) -> String {
    format!("tasks/{task_uuid}/{name}")
}

pub const STDOUT_NAME: &str = "stdout.txt";
pub const STDERR_NAME: &str = "stderr.txt";
