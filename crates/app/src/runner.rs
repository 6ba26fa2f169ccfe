use std::path::{Path, PathBuf};
use std::process;

use pointbench_core::{
    build_hierarchy, Batch, CloudSpec, EngineConfig, FpsStart, HierarchyReport, LevelSpec,
    NeighborMode, Plan, RunControl, SamplingStrategy, TargetCount,
};
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;

use crate::logging::parse_level;

pub(crate) struct RunArgs {
    pub(crate) plan_path: Option<PathBuf>,
    pub(crate) print: bool,
    pub(crate) log_level: LevelFilter,
}

#[derive(Debug, Serialize)]
struct ReportJson {
    total_points: usize,
    clouds: Vec<CloudJson>,
}

#[derive(Debug, Serialize)]
struct CloudJson {
    cloud: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    levels: Vec<LevelJson>,
    duration_ms: f32,
}

#[derive(Debug, Serialize)]
struct LevelJson {
    level: usize,
    sample: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    neighbors: Option<Vec<Vec<usize>>>,
    duration_ms: f32,
}

pub(crate) fn parse_args(args: &[String]) -> Result<RunArgs, String> {
    let mut plan_path = None;
    let mut print = false;
    let mut log_level = LevelFilter::INFO;
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--plan" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--plan requires a path".to_string())?;
                plan_path = Some(PathBuf::from(value));
            }
            "--print" => {
                print = true;
            }
            "--log-level" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--log-level requires a level".to_string())?;
                log_level = parse_level(value)?;
            }
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            other => return Err(format!("unknown argument {other}")),
        }
    }

    Ok(RunArgs {
        plan_path,
        print,
        log_level,
    })
}

fn print_help() {
    println!(
        "Options:\n  --plan <path>\n  --print\n  --log-level <error|warn|info|debug|trace>\n  --help"
    );
}

pub(crate) fn run(args: &RunArgs) -> Result<(), String> {
    let plan = match &args.plan_path {
        Some(path) => load_plan(path)?,
        None => {
            tracing::info!("no plan given, running the built-in demo");
            default_plan()
        }
    };

    let batch = plan.batch().map_err(|err| err.to_string())?;
    tracing::info!(
        clouds = batch.len(),
        points = batch.total_points(),
        levels = plan.levels.len(),
        "running plan"
    );
    let report = build_hierarchy(&batch, &plan.levels, &plan.config, &RunControl::new())
        .map_err(|err| err.to_string())?;

    for outcome in &report.clouds {
        match outcome {
            Ok(hierarchy) => {
                let retained: Vec<usize> =
                    hierarchy.levels.iter().map(|level| level.sample.len()).collect();
                tracing::info!(
                    cloud = hierarchy.cloud,
                    ?retained,
                    duration_ms = hierarchy.duration_ms,
                    "cloud completed"
                );
            }
            Err(failure) => tracing::warn!("{failure}"),
        }
    }

    if args.print {
        let json = report_json(&batch, &report)?;
        let text = serde_json::to_string_pretty(&json).map_err(|err| err.to_string())?;
        println!("{text}");
    }

    let failed = report.failures().count();
    tracing::info!(failed, "plan completed");
    Ok(())
}

fn load_plan(path: &Path) -> Result<Plan, String> {
    let data = std::fs::read(path).map_err(|err| format!("{}: {err}", path.display()))?;
    Plan::from_json(&data).map_err(|err| err.to_string())
}

/// Two small clouds sampled down to three points each, then grouped by radius.
fn default_plan() -> Plan {
    let first = [0.0, 0.5, 1.0, 1.5, 2.0];
    let second = [10.0, 10.5, 11.0];
    let cloud = |xs: &[f32]| CloudSpec::Points {
        points: xs.iter().map(|&x| vec![x, 0.0, 0.0]).collect(),
    };
    Plan {
        clouds: vec![cloud(&first), cloud(&second)],
        config: EngineConfig::default(),
        levels: vec![
            LevelSpec::sample(
                SamplingStrategy::FarthestPoint {
                    start: FpsStart::First,
                },
                TargetCount::Count(3),
            ),
            LevelSpec::neighbors(NeighborMode::Radius { radius: 1.0 }),
        ],
    }
}

fn report_json(batch: &Batch, report: &HierarchyReport) -> Result<ReportJson, String> {
    let mut clouds = Vec::with_capacity(report.clouds.len());
    for (cloud, outcome) in report.clouds.iter().enumerate() {
        let hierarchy = match outcome {
            Ok(hierarchy) => hierarchy,
            Err(failure) => {
                clouds.push(CloudJson {
                    cloud,
                    error: Some(failure.to_string()),
                    levels: Vec::new(),
                    duration_ms: 0.0,
                });
                continue;
            }
        };
        let mut levels = Vec::with_capacity(hierarchy.levels.len());
        for level in &hierarchy.levels {
            levels.push(LevelJson {
                level: level.level,
                sample: report
                    .global_sample(batch, cloud, level.level)
                    .map_err(|err| err.to_string())?,
                neighbors: report
                    .global_neighbors(batch, cloud, level.level)
                    .map_err(|err| err.to_string())?,
                duration_ms: level.duration_ms,
            });
        }
        clouds.push(CloudJson {
            cloud,
            error: None,
            levels,
            duration_ms: hierarchy.duration_ms,
        });
    }
    Ok(ReportJson {
        total_points: batch.total_points(),
        clouds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn parses_flags() {
        let parsed = parse_args(&args(&[
            "pointbench",
            "--plan",
            "plan.json",
            "--print",
            "--log-level",
            "debug",
        ]))
        .unwrap();
        assert_eq!(parsed.plan_path, Some(PathBuf::from("plan.json")));
        assert!(parsed.print);
        assert_eq!(parsed.log_level, LevelFilter::DEBUG);
        assert!(parse_args(&args(&["pointbench", "--plan"])).is_err());
        assert!(parse_args(&args(&["pointbench", "--bogus"])).is_err());
    }

    #[test]
    fn demo_plan_reports_global_indices() {
        let plan = default_plan();
        let batch = plan.batch().unwrap();
        let report =
            build_hierarchy(&batch, &plan.levels, &plan.config, &RunControl::new()).unwrap();
        let json = report_json(&batch, &report).unwrap();
        assert_eq!(json.total_points, 8);
        assert_eq!(json.clouds[1].levels[0].sample, vec![5, 7, 6]);
        let neighbors = json.clouds[1].levels[1].neighbors.as_ref().unwrap();
        assert!(neighbors.iter().flatten().all(|idx| (5..8).contains(idx)));
    }
}
