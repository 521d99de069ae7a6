//! Worker environment assembly

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::Path;

pub const LAMBDA_TASK_ROOT: &str = "LAMBDA_TASK_ROOT";
pub const LAMBDA_RUNTIME_DIR: &str = "LAMBDA_RUNTIME_DIR";
pub const NODE_PATH: &str = "NODE_PATH";

/// Separator between entries of a search path variable
#[cfg(windows)]
pub const PATH_DELIMITER: char = ';';
#[cfg(not(windows))]
pub const PATH_DELIMITER: char = ':';

/// Build the environment a worker is spawned with.
///
/// `base` is overlaid with `lambda_env`; `LAMBDA_TASK_ROOT` and
/// `LAMBDA_RUNTIME_DIR` default to `module_dir`; `NODE_PATH` becomes the
/// existing value, the runtime dir, the task root, `<runtime dir>/node_modules`
/// and `additional_search_path`, skipping empty segments.
///
/// Keys and values are carried as `OsString`, so variables that are not
/// valid UTF-8 pass through untouched.
pub fn lambda_environment(
    base: HashMap<OsString, OsString>,
    lambda_env: &HashMap<OsString, OsString>,
    module_dir: &Path,
    additional_search_path: Option<&OsStr>,
) -> HashMap<OsString, OsString> {
    let mut env = base;
    env.extend(lambda_env.iter().map(|(k, v)| (k.clone(), v.clone())));

    let module_dir = module_dir.as_os_str();
    let task_root = env
        .entry(LAMBDA_TASK_ROOT.into())
        .or_insert_with(|| module_dir.to_os_string())
        .clone();
    let runtime_dir = env
        .entry(LAMBDA_RUNTIME_DIR.into())
        .or_insert_with(|| module_dir.to_os_string())
        .clone();

    let mut runtime_modules = runtime_dir.clone();
    runtime_modules.push("/node_modules");
    let segments = [
        env.get(OsStr::new(NODE_PATH)).map(OsString::as_os_str),
        Some(runtime_dir.as_os_str()),
        Some(task_root.as_os_str()),
        Some(runtime_modules.as_os_str()),
        additional_search_path,
    ];
    let node_path = join_search_path(segments.into_iter().flatten());

    env.insert(NODE_PATH.into(), node_path);
    env
}

/// Join non-empty segments with [`PATH_DELIMITER`]
pub fn join_search_path<'a, S>(segments: impl IntoIterator<Item = &'a S>) -> OsString
where
    S: AsRef<OsStr> + ?Sized + 'a,
{
    let mut joined = OsString::new();
    for segment in segments {
        let segment: &OsStr = segment.as_ref();
        if segment.is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.push(PATH_DELIMITER.encode_utf8(&mut [0; 4]));
        }
        joined.push(segment);
    }
    joined
}
