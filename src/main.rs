use std::process::ExitCode;
use clap::Parser;
use acx_batch::{
    cli::commands::{Cli, Commands},
    utils::reporting::Reporter,
    FfmpegEncoder, Pipeline, SymphoniaDecoder,
};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Normalize { input, output, dry_run, report, settings } => {
            let config = match settings.resolve() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };

            println!("=== ACX normalization ===");
            println!("Input:  {}", input.display());
            println!("Output: {}", output.display());
            println!(
                "Target: {:.1} dBFS, {} kbps CBR, max {:.2} min per file",
                config.target_dbfs,
                config.bitrate_kbps,
                config.max_segment_ms as f64 / 60_000.0
            );

            let encoder = if dry_run {
                FfmpegEncoder::new(&config.ffmpeg, config.bitrate_kbps)
            } else {
                match FfmpegEncoder::locate(&config.ffmpeg, config.bitrate_kbps) {
                    Ok(encoder) => encoder,
                    Err(e) => {
                        eprintln!("{}", e);
                        return ExitCode::FAILURE;
                    }
                }
            };
            let pipeline = Pipeline::new(config, SymphoniaDecoder::new(), encoder);

            if dry_run {
                let plan = match pipeline.plan(&input, &output) {
                    Ok(plan) => plan,
                    Err(e) => {
                        eprintln!("{}", e);
                        return ExitCode::FAILURE;
                    }
                };
                let Some(policy) = plan.channel_policy else {
                    println!("No supported files found in {}", input.display());
                    return ExitCode::FAILURE;
                };
                println!("\nDry run - no files will be written");
                println!("Would convert all files to {}", policy);
                for file in &plan.files {
                    if file.skip {
                        println!("  Would skip duplicate: {}", file.record.path.display());
                        continue;
                    }
                    println!("  {}", file.record.path.display());
                    for out in &file.outputs {
                        println!("    -> {}", out.display());
                    }
                }
                for failure in &plan.scan_failures {
                    println!("  Unreadable: {} ({})", failure.path.display(), failure.reason);
                }
                return ExitCode::SUCCESS;
            }

            let batch = match pipeline.run(&input, &output) {
                Ok(batch) => batch,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };

            if batch.channel_policy.is_none() {
                println!("No supported files found in {}", input.display());
                return ExitCode::FAILURE;
            }

            if let Some(report_path) = report {
                if let Err(e) = Reporter::new().write_batch_report(&batch, &report_path) {
                    eprintln!("Error generating report: {}", e);
                }
            }

            println!("\n=== Done ===");
            println!("Processed: {}", batch.processed());
            println!("Skipped:   {}", batch.skipped());
            println!("Failed:    {}", batch.failed());
            if batch.cancelled() > 0 {
                println!("Cancelled: {}", batch.cancelled());
            }
            println!("Your ACX-compliant MP3s are in: {}", output.display());

            if batch.failed() > 0 {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            }
        }

        Commands::Scan { input, report, settings } => {
            let config = match settings.resolve() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };
            let encoder = FfmpegEncoder::new(&config.ffmpeg, config.bitrate_kbps);
            let pipeline = Pipeline::new(config, SymphoniaDecoder::new(), encoder);

            println!("=== Scanning {} ===", input.display());
            let (scan, duplicates, policy) = match pipeline.scan(&input) {
                Ok(result) => result,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };

            let Some(policy) = policy else {
                println!("No supported files found in {}", input.display());
                return ExitCode::FAILURE;
            };

            for record in &scan.records {
                let secs = record.duration_ms / 1000;
                println!(
                    "{} [{:02}:{:02}] {} ch, {:.1} dBFS",
                    record.path.display(),
                    secs / 60,
                    secs % 60,
                    record.channel_count,
                    record.loudness_dbfs
                );
            }
            for failure in &scan.failures {
                println!("Unreadable: {} ({})", failure.path.display(), failure.reason);
            }

            if duplicates.groups.is_empty() {
                println!("\nNo duplicates found.");
            } else {
                println!("\nDuplicate files detected (extras would be skipped):");
                for group in &duplicates.groups {
                    println!("  Keep: {}", group.keeper.display());
                    for duplicate in &group.duplicates {
                        println!("    Skip: {}", duplicate.display());
                    }
                }
            }
            println!("\nOutput layout: {}", policy);

            if let Some(report_path) = report {
                match Reporter::new().write_duplicate_report(&duplicates.groups, &report_path) {
                    Ok(_) => println!("Report saved to: {}", report_path.display()),
                    Err(e) => eprintln!("Error generating report: {}", e),
                }
            }
            ExitCode::SUCCESS
        }
    }
}
