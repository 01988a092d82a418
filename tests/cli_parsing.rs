use clap::Parser;
use foreman::cli::commands::plan::PlanCommands;
use foreman::cli::commands::queue::QueueCommands;
use foreman::cli::{Cli, Commands};

#[test]
fn test_parse_plan_init() {
    let cli = Cli::try_parse_from([
        "foreman",
        "plan",
        "init",
        "demo",
        "--description",
        "A demo project",
        "--force",
    ])
    .unwrap();

    match cli.command {
        Commands::Plan(args) => match args.command {
            PlanCommands::Init {
                name,
                description,
                from,
                force,
            } => {
                assert_eq!(name, "demo");
                assert_eq!(description, "A demo project");
                assert!(from.is_none());
                assert!(force);
            }
            other => panic!("Wrong plan command: {other:?}"),
        },
        Commands::Queue(_) => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_plan_reset_task_with_global_json() {
    let cli = Cli::try_parse_from(["foreman", "plan", "reset-task", "task-003", "--json"]).unwrap();

    assert!(cli.json);
    assert!(matches!(
        cli.command,
        Commands::Plan(args) if matches!(&args.command, PlanCommands::ResetTask { id } if id == "task-003")
    ));
}

#[test]
fn test_parse_queue_add_many() {
    let cli = Cli::try_parse_from(["foreman", "queue", "add", "first", "second", "-p", "3"]).unwrap();

    match cli.command {
        Commands::Queue(args) => match args.command {
            QueueCommands::Add {
                descriptions,
                priority,
            } => {
                assert_eq!(descriptions, vec!["first", "second"]);
                assert_eq!(priority, 3);
            }
            other => panic!("Wrong queue command: {other:?}"),
        },
        Commands::Plan(_) => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_queue_reorder_negative_priority() {
    let cli = Cli::try_parse_from(["foreman", "queue", "reorder", "abcd1234", "-5"]).unwrap();

    assert!(matches!(
        cli.command,
        Commands::Queue(args)
            if matches!(&args.command, QueueCommands::Reorder { id, priority } if id == "abcd1234" && *priority == -5)
    ));
}

#[test]
fn test_queue_add_requires_description() {
    assert!(Cli::try_parse_from(["foreman", "queue", "add"]).is_err());
}

#[test]
fn test_unknown_subcommand_is_rejected() {
    assert!(Cli::try_parse_from(["foreman", "plan", "explode"]).is_err());
}
