use crate::data::Window;
use crate::engine::fault::Fault;
use crate::error::{BacktestError, Result};
use crate::strategy::{NamedStrategy, Strategy};
use rhai::module_resolvers::FileModuleResolver;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Position, Scope, AST};
use std::path::{Path, PathBuf};

//every strategy file must define this function
pub const ENTRY_POINT: &str = "portfolio_fun";

//how helper functions of several files relate to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptNamespace {
    //each file gets its own engine and function namespace
    #[default]
    Isolated,
    //helpers of all files loaded together share one namespace, later files win
    Shared,
}

//a strategy sourced from a rhai script
pub struct ScriptStrategy {
    path: PathBuf,
    engine: Engine,
    ast: AST,
    arity: usize,
}

fn script_error(path: &Path, reason: impl Into<String>) -> BacktestError {
    BacktestError::Script {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

//fresh engine whose imports resolve next to the script
fn new_engine(path: &Path, max_operations: Option<u64>) -> Engine {
    let mut engine = Engine::new();
    let base = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    engine.set_module_resolver(FileModuleResolver::new_with_path(base));
    if let Some(limit) = max_operations {
        engine.set_max_operations(limit);
    }
    let origin = path.display().to_string();
    engine.on_print(move |text| log::info!("[{}] {}", origin, text));
    engine
}

impl ScriptStrategy {
    //compiles one file into its own namespace
    pub fn load<P: AsRef<Path>>(path: P, max_operations: Option<u64>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(script_error(path, "file not found"));
        }
        let engine = new_engine(path, max_operations);
        let ast = engine
            .compile_file(path.to_path_buf())
            .map_err(|e| script_error(path, e.to_string()))?;
        ScriptStrategy::from_ast(path, engine, ast)
    }

    fn from_ast(path: &Path, engine: Engine, ast: AST) -> Result<Self> {
        let arity = ast
            .iter_functions()
            .filter(|f| f.name == ENTRY_POINT)
            .map(|f| f.params.len())
            .max()
            .ok_or_else(|| script_error(path, format!("no function named `{}`", ENTRY_POINT)))?;
        if !(1..=2).contains(&arity) {
            return Err(script_error(
                path,
                format!("`{}` takes {} parameters, expected 1 or 2", ENTRY_POINT, arity),
            ));
        }
        Ok(ScriptStrategy {
            path: path.to_path_buf(),
            engine,
            ast,
            arity,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    //file stem, used as the default display name
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    fn call(&self, window: &Window<'_>, current: &[f64]) -> std::result::Result<Dynamic, Box<EvalAltResult>> {
        let mut scope = Scope::new();
        let data = window_map(window);
        if self.arity == 1 {
            self.engine
                .call_fn::<Dynamic>(&mut scope, &self.ast, ENTRY_POINT, (data,))
        } else {
            let held: Array = current.iter().map(|w| Dynamic::from_float(*w)).collect();
            self.engine
                .call_fn::<Dynamic>(&mut scope, &self.ast, ENTRY_POINT, (data, held))
        }
    }

    fn fault(&self, err: &EvalAltResult) -> Fault {
        let mut trace = Vec::new();
        let mut inner = err;
        loop {
            match inner {
                EvalAltResult::ErrorInFunctionCall(name, _, next, pos) => {
                    trace.push(format!("in fn {} called at {}", name, self.site(*pos)));
                    inner = &**next;
                }
                EvalAltResult::ErrorInModule(name, next, pos) => {
                    trace.push(format!("in module {} imported at {}", name, self.site(*pos)));
                    inner = &**next;
                }
                _ => break,
            }
        }
        Fault::new(inner.to_string())
            .with_location(self.site(inner.position()))
            .with_trace(trace)
    }

    fn site(&self, pos: Position) -> String {
        match (pos.line(), pos.position()) {
            (Some(line), Some(col)) => format!("{}:{}:{}", self.path.display(), line, col),
            (Some(line), None) => format!("{}:{}", self.path.display(), line),
            _ => self.path.display().to_string(),
        }
    }
}

impl Strategy for ScriptStrategy {
    fn weights(&self, window: &Window<'_>, current: &[f64]) -> anyhow::Result<Vec<f64>> {
        let value = self.call(window, current).map_err(|e| self.fault(&e))?;
        let array = value.into_array().map_err(|kind| {
            Fault::new(format!("`{}` returned {} instead of an array", ENTRY_POINT, kind))
                .with_location(self.path.display().to_string())
        })?;
        let weights = array
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_float()
                    .or_else(|_| v.as_int().map(|n| n as f64))
                    .map_err(|kind| {
                        Fault::new(format!("weight {} is {}, not a number", i, kind))
                            .with_location(self.path.display().to_string())
                    })
            })
            .collect::<std::result::Result<Vec<f64>, Fault>>()?;
        Ok(weights)
    }
}

//the window as a script-facing map of field name to rows
pub fn window_map(window: &Window<'_>) -> Map {
    let mut map = Map::new();
    let assets: Array = window.assets().iter().map(|a| Dynamic::from(a.clone())).collect();
    let timestamps: Array = window
        .timestamps()
        .iter()
        .map(|t| Dynamic::from(t.to_rfc3339()))
        .collect();
    map.insert("assets".into(), Dynamic::from_array(assets));
    map.insert("timestamps".into(), Dynamic::from_array(timestamps));

    for (field, view) in window.fields() {
        let rows: Array = view
            .iter_rows()
            .map(|row| Dynamic::from_array(row.iter().map(|x| Dynamic::from_float(*x)).collect()))
            .collect();
        map.insert(field.as_str().into(), Dynamic::from_array(rows));
    }
    if let Some(index) = window.index() {
        let series: Array = index.iter().map(|x| Dynamic::from_float(*x)).collect();
        map.insert("index".into(), Dynamic::from_array(series));
    }
    map
}

//helpers of every file, a later file's definition replacing an earlier one
//with the same name and arity; the pieces merged are disjoint so the result
//does not depend on how rhai resolves collisions inside a merge
fn shared_helpers(loaded: &[ScriptStrategy]) -> AST {
    let signatures: Vec<Vec<(String, usize)>> = loaded
        .iter()
        .map(|s| {
            s.ast
                .iter_functions()
                .map(|f| (f.name.to_string(), f.params.len()))
                .collect()
        })
        .collect();
    loaded.iter().enumerate().fold(AST::empty(), |acc, (i, s)| {
        let later = &signatures[i + 1..];
        let kept = s.ast.clone_functions_only_filtered(|_, _, _, name, arity| {
            name != ENTRY_POINT
                && !later
                    .iter()
                    .flatten()
                    .any(|(other, n)| other == name && *n == arity)
        });
        acc.merge(&kept)
    })
}

//loads several files in one call, named after their file stems
pub fn load_scripts(
    paths: &[PathBuf],
    namespace: ScriptNamespace,
    max_operations: Option<u64>,
) -> Result<Vec<NamedStrategy>> {
    let mut loaded = Vec::with_capacity(paths.len());
    for path in paths {
        loaded.push(ScriptStrategy::load(path, max_operations)?);
    }

    if namespace == ScriptNamespace::Shared {
        log::warn!("loading {} scripts into a shared namespace", loaded.len());
        let helpers = shared_helpers(&loaded);
        loaded = loaded
            .into_iter()
            .map(|s| {
                let entry = s
                    .ast
                    .clone_functions_only_filtered(|_, _, _, name, _| name == ENTRY_POINT);
                let ast = entry.merge(&helpers);
                ScriptStrategy { ast, ..s }
            })
            .collect();
    }

    Ok(loaded
        .into_iter()
        .map(|s| NamedStrategy::new(s.stem(), s))
        .collect())
}

//loads every .rhai file of a folder in name order
pub fn load_script_dir<P: AsRef<Path>>(
    dir: P,
    namespace: ScriptNamespace,
    max_operations: Option<u64>,
) -> Result<Vec<NamedStrategy>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(BacktestError::MissingFolder(dir.to_path_buf()));
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "rhai").unwrap_or(false))
        .collect();
    paths.sort();
    load_scripts(&paths, namespace, max_operations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, Field, FieldMatrix};
    use chrono::{TimeZone, Utc};

    fn dataset() -> Dataset {
        let ts = (0..5)
            .map(|i| Utc.with_ymd_and_hms(2022, 6, 1 + i, 0, 0, 0).unwrap())
            .collect();
        let prices = FieldMatrix::from_rows(vec![
            vec![10.0, 20.0, 30.0],
            vec![11.0, 20.0, 29.0],
            vec![12.0, 21.0, 28.0],
            vec![13.0, 22.0, 27.0],
            vec![14.0, 23.0, 26.0],
        ])
        .unwrap();
        Dataset::builder("d", ts, vec!["A".into(), "B".into(), "C".into()])
            .field(Field::Adjusted, prices)
            .index(vec![1.0, 1.0, 1.0, 1.0, 1.0])
            .build()
            .unwrap()
    }

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_single_argument_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "eq.rhai",
            r#"
            fn portfolio_fun(data) {
                let n = data.assets.len();
                let w = [];
                for i in 0..n { w.push(1.0 / n); }
                w
            }
            "#,
        );
        let strategy = ScriptStrategy::load(&path, None).unwrap();
        let ds = dataset();
        let w = strategy.weights(&ds.window(0..3), &[0.0; 3]).unwrap();
        assert_eq!(w.len(), 3);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_reads_prices_and_current_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "last.rhai",
            r#"
            fn portfolio_fun(data, w_current) {
                let last = data.adjusted[data.adjusted.len() - 1];
                [last[0] / 100.0, w_current[1], 0]
            }
            "#,
        );
        let strategy = ScriptStrategy::load(&path, None).unwrap();
        let ds = dataset();
        let w = strategy.weights(&ds.window(0..3), &[0.0, 0.25, 0.0]).unwrap();
        assert_eq!(w, vec![0.12, 0.25, 0.0]);
    }

    #[test]
    fn test_missing_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "none.rhai", "fn helper(x) { x }");
        let err = ScriptStrategy::load(&path, None).err().unwrap();
        assert!(err.to_string().contains(ENTRY_POINT));
    }

    #[test]
    fn test_runtime_error_carries_call_stack() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "broken.rhai",
            r#"
            fn estimate(data) {
                throw "covariance is singular";
            }
            fn portfolio_fun(data) {
                estimate(data)
            }
            "#,
        );
        let strategy = ScriptStrategy::load(&path, None).unwrap();
        let ds = dataset();
        let err = strategy.weights(&ds.window(0..3), &[0.0; 3]).unwrap_err();
        let fault = Fault::from_error(&err);
        assert!(fault.message.contains("covariance is singular"));
        assert!(fault.location.unwrap().contains("broken.rhai"));
        assert!(fault.trace.iter().any(|f| f.contains("estimate")));
    }

    #[test]
    fn test_operation_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "spin.rhai",
            "fn portfolio_fun(data) { loop { } }",
        );
        let strategy = ScriptStrategy::load(&path, Some(10_000)).unwrap();
        let ds = dataset();
        assert!(strategy.weights(&ds.window(0..3), &[0.0; 3]).is_err());
    }

    #[test]
    fn test_shared_namespace_lets_helpers_collide() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(
            dir.path(),
            "a.rhai",
            "fn base() { 0.5 } fn level() { 0.1 } fn portfolio_fun(data) { [level(), base(), 0.0] }",
        );
        let b = write(
            dir.path(),
            "b.rhai",
            "fn level() { 0.9 } fn portfolio_fun(data) { [0.0, level(), 0.0] }",
        );
        let ds = dataset();
        let window = ds.window(0..3);

        let isolated = load_scripts(&[a.clone(), b.clone()], ScriptNamespace::Isolated, None).unwrap();
        assert_eq!(isolated[0].name, "a");
        assert_eq!(isolated[0].strategy.weights(&window, &[0.0; 3]).unwrap()[0], 0.1);

        let shared = load_scripts(&[a, b], ScriptNamespace::Shared, None).unwrap();
        //the later file's helper wins, helpers nobody redefines stay visible
        assert_eq!(
            shared[0].strategy.weights(&window, &[0.0; 3]).unwrap(),
            vec![0.9, 0.5, 0.0]
        );
        assert_eq!(
            shared[1].strategy.weights(&window, &[0.0; 3]).unwrap(),
            vec![0.0, 0.9, 0.0]
        );
    }
}
