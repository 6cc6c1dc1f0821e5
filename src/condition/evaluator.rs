use std::{
    collections::HashMap,
    hash::Hasher,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::Mutex,
};

use regress::Regex;

use crate::{
    case_insensitive_regex,
    metadata::plugin_metadata::{GHOST_FILE_EXTENSION, iends_with_ascii},
    plugin::extract_version,
};

use super::{
    error::Error,
    grammar::{Comparator, Compound, Function, Term},
};

const LOOT_PSEUDO_FILENAME: &str = "LOOT";

/// Holds the game-specific state that conditions are evaluated against: the
/// data directory, the plugins currently known to be active, and cached
/// plugin versions and CRCs collected during the most recent plugin load.
#[derive(Debug)]
pub struct State {
    data_path: PathBuf,
    additional_data_paths: Vec<PathBuf>,
    active_plugins: Vec<String>,
    plugin_versions: HashMap<String, String>,
    plugin_crcs: Mutex<HashMap<String, u32>>,
    condition_cache: Mutex<HashMap<String, bool>>,
}

impl State {
    #[must_use]
    pub fn new(data_path: PathBuf) -> Self {
        Self {
            data_path,
            additional_data_paths: Vec::new(),
            active_plugins: Vec::new(),
            plugin_versions: HashMap::new(),
            plugin_crcs: Mutex::new(HashMap::new()),
            condition_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_additional_data_paths(&mut self, paths: Vec<PathBuf>) {
        self.additional_data_paths = paths;
    }

    pub fn set_active_plugins(&mut self, plugins: &[&str]) {
        self.active_plugins = plugins.iter().map(|p| (*p).to_owned()).collect();
    }

    pub fn set_plugin_versions(&mut self, versions: &[(&str, &str)]) {
        self.plugin_versions = versions
            .iter()
            .map(|(name, version)| (name.to_lowercase(), (*version).to_owned()))
            .collect();
    }

    /// # Errors
    ///
    /// Returns an error if the CRC cache's lock is poisoned.
    pub fn set_cached_crcs(&mut self, crcs: &[(&str, u32)]) -> Result<(), Error> {
        let mut cache = self.plugin_crcs.lock()?;
        cache.clear();
        cache.extend(crcs.iter().map(|(name, crc)| (name.to_lowercase(), *crc)));
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the condition cache's lock is poisoned.
    pub fn clear_condition_cache(&self) -> Result<(), Error> {
        self.condition_cache.lock()?.clear();
        Ok(())
    }

    fn is_active(&self, plugin: &str) -> bool {
        self.active_plugins
            .iter()
            .any(|p| p.eq_ignore_ascii_case(plugin))
    }

    fn data_directories(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.data_path.as_path()).chain(self.additional_data_paths.iter().map(PathBuf::as_path))
    }

    fn resolve_existing_path(&self, path: &str) -> Option<PathBuf> {
        for base in self.data_directories() {
            let candidate = base.join(path);
            if candidate.exists() {
                return Some(candidate);
            }

            if iends_with_ascii(path, ".esp") || iends_with_ascii(path, ".esm") {
                let mut ghosted = candidate.into_os_string();
                ghosted.push(GHOST_FILE_EXTENSION);
                let ghosted = PathBuf::from(ghosted);
                if ghosted.exists() {
                    return Some(ghosted);
                }
            }
        }

        None
    }

    fn file_exists(&self, path: &str) -> Result<bool, Error> {
        validate_path(path)?;

        if path == LOOT_PSEUDO_FILENAME {
            return Ok(true);
        }

        Ok(self.resolve_existing_path(path).is_some())
    }

    fn regex_directory_matches(&self, pattern: &str) -> Result<Vec<String>, Error> {
        let (parent, regex) = split_regex(pattern)?;

        for base in self.data_directories() {
            let dir = base.join(&parent);
            if !dir.is_dir() {
                continue;
            }

            let mut matches = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let filename = entry.file_name();
                let filename = filename.to_string_lossy();
                if regex.find(&filename).is_some() {
                    matches.push(filename.into_owned());
                }
            }

            return Ok(matches);
        }

        Ok(Vec::new())
    }

    fn checksum(&self, path: &str) -> Result<u32, Error> {
        if path == LOOT_PSEUDO_FILENAME {
            let exe = std::env::current_exe()?;
            return calculate_crc(&exe).map_err(Error::Io);
        }

        if let Some(crc) = self.plugin_crcs.lock()?.get(&path.to_lowercase()) {
            return Ok(*crc);
        }

        match self.resolve_existing_path(path) {
            Some(resolved) => calculate_crc(&resolved).map_err(Error::Io),
            None => Ok(0),
        }
    }

    fn version_string(&self, path: &str) -> Result<Option<String>, Error> {
        if path == LOOT_PSEUDO_FILENAME {
            let exe = std::env::current_exe()?;
            return extract_version_from_file(&exe);
        }

        if let Some(version) = self.plugin_versions.get(&path.to_lowercase()) {
            return Ok(Some(version.clone()));
        }

        match self.resolve_existing_path(path) {
            Some(resolved) => extract_version_from_file(&resolved),
            None => Ok(None),
        }
    }
}

fn calculate_crc(path: &Path) -> std::io::Result<u32> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = crc32fast::Hasher::new();

    let mut buffer = reader.fill_buf()?;
    while !buffer.is_empty() {
        hasher.write(buffer);
        let length = buffer.len();
        reader.consume(length);

        buffer = reader.fill_buf()?;
    }

    Ok(hasher.finalize())
}

fn extract_version_from_file(path: &Path) -> Result<Option<String>, Error> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);

    extract_version(&text).map_err(Error::VersionRegex)
}

/// Rejects absolute paths and any path containing a `..` segment that
/// follows a segment other than another `..`.
fn validate_path(path: &str) -> Result<(), Error> {
    let path_ref = Path::new(path);

    if path_ref.is_absolute() {
        return Err(Error::InvalidArgument(
            format!("\"{path}\" is an absolute path").into(),
        ));
    }

    let mut previous_was_parent = false;
    for component in path_ref.components() {
        match component {
            std::path::Component::ParentDir => {
                if previous_was_parent {
                    return Err(Error::InvalidArgument(
                        format!("\"{path}\" is not a safe path").into(),
                    ));
                }
                previous_was_parent = true;
            }
            std::path::Component::CurDir => {}
            _ => previous_was_parent = false,
        }
    }

    Ok(())
}

fn split_regex(pattern: &str) -> Result<(PathBuf, Regex), Error> {
    let (parent, filename) = match pattern.rfind('/') {
        Some(pos) => (&pattern[..pos], &pattern[pos + 1..]),
        None => ("", pattern),
    };

    validate_path(parent)?;

    let regex = case_insensitive_regex(filename).map_err(Error::Regex)?;

    Ok((PathBuf::from(parent), regex))
}

fn is_regex_path(path: &str) -> bool {
    path.contains([':', '\\', '*', '?', '|'])
}

impl super::Expression {
    /// Evaluates the expression against the given state.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation encounters an invalid path, an
    /// unreadable file, or a poisoned cache lock.
    pub fn eval(&self, state: &State) -> Result<bool, Error> {
        eval_compounds(&self.compounds, state)
    }
}

fn eval_compounds(compounds: &[Compound], state: &State) -> Result<bool, Error> {
    for compound in compounds {
        if eval_terms(&compound.0, state)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn eval_terms(terms: &[Term], state: &State) -> Result<bool, Error> {
    for term in terms {
        if !eval_term(term, state)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval_term(term: &Term, state: &State) -> Result<bool, Error> {
    match term {
        Term::Function(function) => eval_function(function, state),
        Term::Not(inner) => eval_term(inner, state).map(|b| !b),
        Term::Group(compounds) => eval_compounds(compounds, state),
    }
}

fn eval_function(function: &Function, state: &State) -> Result<bool, Error> {
    let cache_key = cache_key(function);

    if let Some(cached) = state.condition_cache.lock()?.get(&cache_key) {
        return Ok(*cached);
    }

    let result = eval_function_uncached(function, state)?;

    state.condition_cache.lock()?.insert(cache_key, result);

    Ok(result)
}

fn cache_key(function: &Function) -> String {
    format!("{function:?}")
}

fn eval_function_uncached(function: &Function, state: &State) -> Result<bool, Error> {
    match function {
        Function::File(path) => {
            if is_regex_path(path) {
                Ok(!state.regex_directory_matches(path)?.is_empty())
            } else {
                state.file_exists(path)
            }
        }
        Function::Many(regex) => Ok(state.regex_directory_matches(regex)?.len() > 1),
        Function::Checksum(path, expected) => Ok(state.checksum(path)? == *expected),
        Function::Version(path, version, comparator) => {
            eval_version(state, path, version, *comparator)
        }
        Function::Active(plugin) => {
            if plugin == LOOT_PSEUDO_FILENAME {
                Ok(false)
            } else if is_regex_path(plugin) {
                let matches = state.regex_directory_matches(plugin)?;
                Ok(matches.iter().any(|name| state.is_active(name)))
            } else {
                validate_path(plugin)?;
                Ok(state.is_active(plugin))
            }
        }
        Function::ManyActive(regex) => {
            let matches = state.regex_directory_matches(regex)?;
            Ok(matches.iter().filter(|name| state.is_active(name)).count() > 1)
        }
    }
}

fn eval_version(
    state: &State,
    path: &str,
    test_version: &str,
    comparator: Comparator,
) -> Result<bool, Error> {
    if !state.file_exists(path)? {
        return Ok(matches!(
            comparator,
            Comparator::NotEqual | Comparator::LessThan | Comparator::LessOrEqual
        ));
    }

    let actual_version = state.version_string(path)?.unwrap_or_default();
    let ordering = compare_versions(&actual_version, test_version);

    Ok(match comparator {
        Comparator::Equal => ordering == std::cmp::Ordering::Equal,
        Comparator::NotEqual => ordering != std::cmp::Ordering::Equal,
        Comparator::LessThan => ordering == std::cmp::Ordering::Less,
        Comparator::LessOrEqual => ordering != std::cmp::Ordering::Greater,
        Comparator::GreaterThan => ordering == std::cmp::Ordering::Greater,
        Comparator::GreaterOrEqual => ordering != std::cmp::Ordering::Less,
    })
}

/// Compares two version strings component-wise, treating each
/// `.`/`-`/`_`/`:`-separated run of digits as a number and falling back to a
/// lexicographic comparison of non-numeric components.
fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let mut a_parts = split_version(a);
    let mut b_parts = split_version(b);

    loop {
        match (a_parts.next(), b_parts.next()) {
            (None, None) => return std::cmp::Ordering::Equal,
            (None, Some(_)) => return std::cmp::Ordering::Less,
            (Some(_), None) => return std::cmp::Ordering::Greater,
            (Some(a), Some(b)) => {
                let ordering = match (a.parse::<u64>(), b.parse::<u64>()) {
                    (Ok(a), Ok(b)) => a.cmp(&b),
                    _ => a.cmp(b),
                };
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn split_version(version: &str) -> impl Iterator<Item = &str> {
    version
        .trim_start_matches(['v', 'V'])
        .split(['.', '-', '_', ':'])
        .filter(|s| !s.is_empty())
}
