//! Interactive instruction loop.
//!
//! Every non-command line is treated as an instruction: it is planned
//! (remote planner first when configured, macro vocabulary otherwise), the
//! plan is printed, then validated and executed. `stop` issues an emergency
//! stop, `exit`/`quit` leave the loop, and Ctrl-C stops every node before
//! exiting.

use std::sync::Arc;

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use uuid::Uuid;

use maestro_orchestrator::Orchestrator;

pub async fn run(orchestrator: Arc<Orchestrator>) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "orchestrator ready. Type instructions, {} for emergency stop, {} to quit.",
        "stop".bold(),
        "exit".bold()
    );

    let mut editor = DefaultEditor::new()?;
    loop {
        // rustyline blocks on the terminal; keep it off the async runtime.
        let (line, returned) = tokio::task::spawn_blocking(move || {
            let line = editor.readline("maestro> ");
            (line, editor)
        })
        .await?;
        editor = returned;

        let line = match line {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!();
                println!(
                    "{}",
                    "Ctrl-C received, issuing STOP to all nodes...".yellow().bold()
                );
                orchestrator.emergency_stop().await;
                println!("{}", "global stop sent".green());
                break;
            }
            Err(ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(err) => return Err(err.into()),
        };

        let instruction = line.trim();
        if instruction.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(instruction);

        match instruction.to_lowercase().as_str() {
            "exit" | "quit" => break,
            "stop" => {
                orchestrator.emergency_stop().await;
                println!("{}", "global stop sent".green());
                continue;
            }
            _ => {}
        }

        let correlation_id = {
            let hex = Uuid::new_v4().simple().to_string();
            format!("repl-{}", &hex[..12])
        };
        let plan = match orchestrator.make_plan(instruction, &correlation_id).await {
            Ok(plan) => plan,
            Err(err) => {
                println!("{} {err}", "planning error:".red());
                continue;
            }
        };
        match serde_json::to_string_pretty(&plan) {
            Ok(json) => println!("{json}"),
            Err(err) => println!("{} {err}", "print error:".red()),
        }

        match orchestrator.execute_plan(&plan, &correlation_id).await {
            Ok(_) => println!("{}", "plan executed".green()),
            Err(err) => println!("{} {err}", "execution error:".red()),
        }
    }
    Ok(())
}
