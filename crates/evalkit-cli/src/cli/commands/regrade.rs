use super::{exit_codes, open_existing};
use crate::cli::args::RegradeArgs;
use evalkit_core::config::load_pack;
use evalkit_core::engine::regrade::regrade_run;

pub fn cmd_regrade(args: RegradeArgs) -> anyhow::Result<i32> {
    let pack = match load_pack(&args.pack, &args.dir) {
        Ok(pack) => pack,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let Some(spec) = pack.grader.as_ref() else {
        eprintln!("pack '{}' declares no grader", pack.id);
        return Ok(exit_codes::CONFIG_ERROR);
    };
    let grader = match evalkit_graders::from_spec(spec) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let Some(store) = open_existing(&args.db)? else {
        return Ok(exit_codes::CONFIG_ERROR);
    };
    let run_id = match args.run {
        Some(id) => id,
        None => match store.latest_run_id(Some(&pack.id))? {
            Some(id) => id,
            None => {
                eprintln!("No runs found for pack {}.", pack.id);
                return Ok(exit_codes::TEST_FAILED);
            }
        },
    };

    let summary = regrade_run(&store, &run_id, grader.as_ref())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "run_id": run_id,
            "summary": summary,
        }))?
    );
    Ok(exit_codes::OK)
}
