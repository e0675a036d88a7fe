//! Demo entry point.
//!
//! # Responsibility
//! - Walk through add/extend/shrink of one member's group links.
//! - Print the statements every flush issued, then the reloaded member.
//! - Leave the database empty afterwards, whether the walk-through failed
//!   or not.

use log::error;
use memberlink_core::db::{open_db, open_db_in_memory};
use memberlink_core::{
    init_logging, CoreConfig, FlushReport, Group, Member, SqliteEntityStore, UnitOfWork,
    UowResult,
};
use std::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run(&CoreConfig::from_env()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=demo_run module=cli status=error error={err}");
            eprintln!("memberlink demo failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &CoreConfig) -> Result<(), Box<dyn Error>> {
    if let Some(log_dir) = config.log_dir.as_deref() {
        init_logging(&config.log_level, log_dir)?;
    }
    println!("memberlink_core version={}", memberlink_core::core_version());

    let mut conn = match config.database_path.as_deref() {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    let mut store = SqliteEntityStore::try_new(&mut conn)?;
    store.purge_all()?;

    let mut uow = UnitOfWork::new(store);
    let outcome = walk_through(&mut uow);
    let mut store = uow.close();
    store.purge_all()?;

    outcome.map_err(Into::into)
}

fn walk_through(uow: &mut UnitOfWork<SqliteEntityStore<'_>>) -> UowResult<()> {
    let group1 = Group::new();
    let group2 = Group::new();
    let member = Member::new();

    uow.persist_group(&group1)?;
    uow.persist_group(&group2)?;
    uow.persist_member(&member)?;
    print_report("persist group1, group2, member", &uow.flush()?);

    uow.declare_links(member.key(), [member.link_to(group1.id)])?;
    // persisting the tracked member again only confirms its links
    let tracked = uow.find_member(member.id)?;
    uow.persist_member(&tracked)?;
    print_report("link member to group1", &uow.flush()?);

    uow.declare_links(
        member.key(),
        [member.link_to(group1.id), member.link_to(group2.id)],
    )?;
    print_report("link member to group1 and group2", &uow.flush()?);

    uow.declare_links(member.key(), [member.link_to(group1.id)])?;
    print_report("unlink member from group2", &uow.flush()?);

    let loaded = uow.find_member(member.id)?;
    println!("member {} groups={:?}", loaded.id, loaded.group_ids());
    Ok(())
}

fn print_report(step: &str, report: &FlushReport) {
    println!("-- {step}");
    if report.is_empty() {
        println!("   (no statements)");
    }
    for statement in &report.statements {
        println!("   {statement}");
    }
}
