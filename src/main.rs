use anyhow::{bail, Context, Result};
use std::env;
use tracing_subscriber::EnvFilter;

use club_registration::{
    verify_chain, AllocationError, Club, ClubRegistry, ConfigError, ConfigStore, Registrant,
    RegistrantKey, Services, Settings, WindowPhase,
};

const USAGE: &str = "\
Usage: club-registration <command> [args]

Commands:
  init                                   write the config file and create the ledger
  clubs                                  show capacity and availability per club
  submit <class> <seat> <name> <club>    register (only while the window is open)
  cancel <class> <seat>                  cancel a registration
  move <club> <class:seat>...            move registrants to another club
  force-add <club> <class:seat:name>...  enroll unregistered people directly
  delete <class:seat>...                 delete registrations
  lookup <name>                          find registrations by name
  roster <club>                          ranked list for one club
  stats                                  totals for the dashboard
  verify                                 check the ledger hash chain
  club-set <club> <primary> <waitlist>   add a club or change its capacities
  club-rename <club> <new-name>          rename a club nobody has registered for
  club-remove <club>                     remove a club nobody has registered for

Config file: $CLUB_CONFIG (default: club_config.json)";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    match command.as_str() {
        "init" => run_init(),
        "clubs" => run_clubs(),
        "submit" => run_submit(rest),
        "cancel" => run_cancel(rest),
        "move" => run_move(rest),
        "force-add" => run_force_add(rest),
        "delete" => run_delete(rest),
        "lookup" => run_lookup(rest),
        "roster" => run_roster(rest),
        "stats" => run_stats(),
        "verify" => run_verify(),
        "club-set" => run_club_set(rest),
        "club-rename" => run_club_rename(rest),
        "club-remove" => run_club_remove(rest),
        other => {
            eprintln!("❌ Unknown command: {}\n", other);
            println!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

fn load() -> Result<(Settings, Services)> {
    let path = Settings::default_path();
    let settings = Settings::load(&path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    let services = Services::open(&settings)?;
    Ok((settings, services))
}

/// Print engine errors the way users see them; storage errors propagate.
fn report(err: AllocationError) -> Result<()> {
    match err {
        e if e.is_contention() => {
            eprintln!("❌ {} ({}), try again", e, e.kind());
            std::process::exit(1);
        }
        AllocationError::Ledger(e) => Err(e.into()),
        other => {
            eprintln!("❌ {} ({})", other, other.kind());
            std::process::exit(1);
        }
    }
}

fn run_init() -> Result<()> {
    let path = Settings::default_path();
    let settings = Settings::load(&path)?;
    if !path.exists() {
        settings.save(&path)?;
        println!("✓ Wrote default config: {}", path.display());
    } else {
        println!("✓ Config already present: {}", path.display());
    }

    Services::open(&settings)?;
    println!("✓ Ledger ready: {}", settings.database_path.display());
    Ok(())
}

fn run_clubs() -> Result<()> {
    let (_, services) = load()?;

    println!("🏆 Clubs");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for a in services.query.availability()? {
        let next = match a.next_status {
            Some(status) => status.label(),
            None => "FULL",
        };
        println!(
            "{:<20} primary {:>3}/{:<3} waitlist {:>3}/{:<3} {:>5.0}%  next: {}",
            a.club.id,
            a.occupancy.primary,
            a.club.primary_capacity,
            a.occupancy.waitlisted,
            a.club.waitlist_capacity,
            a.fill_ratio * 100.0,
            next
        );
    }
    Ok(())
}

fn run_submit(args: &[String]) -> Result<()> {
    let [class_id, seat, name, club] = args else {
        bail!("usage: submit <class> <seat> <name> <club>");
    };
    let (_, services) = load()?;

    if let Err(e) = services.window.check_now() {
        eprintln!("⏳ {}", e);
        std::process::exit(1);
    }

    let key = RegistrantKey::new(class_id, seat)?;
    match services.engine.submit(&key, club, name) {
        Ok(status) => {
            println!("🎉 {} registered for {} ({})", name, club, status.label());
            Ok(())
        }
        Err(e) => report(e),
    }
}

fn run_cancel(args: &[String]) -> Result<()> {
    let [class_id, seat] = args else {
        bail!("usage: cancel <class> <seat>");
    };
    let (_, services) = load()?;

    let key = RegistrantKey::new(class_id, seat)?;
    match services.engine.cancel(&key) {
        Ok(record) => {
            println!("✓ Cancelled {} ({}) from {}", record.display_name, key, record.club_id);
            Ok(())
        }
        Err(e) => report(e),
    }
}

fn parse_keys(raw: &[String]) -> Result<Vec<RegistrantKey>> {
    raw.iter()
        .map(|s| s.parse::<RegistrantKey>().map_err(anyhow::Error::from))
        .collect()
}

fn run_move(args: &[String]) -> Result<()> {
    let Some((club, raw_keys)) = args.split_first() else {
        bail!("usage: move <club> <class:seat>...");
    };
    let keys = parse_keys(raw_keys)?;
    let (_, services) = load()?;

    match services.engine.batch_move(&keys, club) {
        Ok(moved) => {
            for record in &moved {
                println!("✓ {} → {} ({})", record.key, club, record.status.label());
            }
            println!("✓ Moved {} registrants", moved.len());
            Ok(())
        }
        Err(e) => report(e),
    }
}

fn run_force_add(args: &[String]) -> Result<()> {
    let Some((club, raw)) = args.split_first() else {
        bail!("usage: force-add <club> <class:seat:name>...");
    };

    let mut registrants = Vec::with_capacity(raw.len());
    for item in raw {
        let mut parts = item.splitn(3, ':');
        let (Some(class_id), Some(seat), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            bail!("expected class:seat:name, got {:?}", item);
        };
        registrants.push(Registrant::new(RegistrantKey::new(class_id, seat)?, name)?);
    }
    let (_, services) = load()?;

    match services.engine.batch_force_add(&registrants, club) {
        Ok(added) => {
            for record in &added {
                println!("✓ {} {} → {} ({})", record.key, record.display_name, club, record.status.label());
            }
            println!("✓ Added {} registrants", added.len());
            Ok(())
        }
        Err(e) => report(e),
    }
}

fn run_delete(args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("usage: delete <class:seat>...");
    }
    let keys = parse_keys(args)?;
    let (_, services) = load()?;

    match services.engine.batch_delete(&keys) {
        Ok(removed) => {
            println!("✓ Deleted {} registrations", removed.len());
            Ok(())
        }
        Err(e) => report(e),
    }
}

fn run_lookup(args: &[String]) -> Result<()> {
    let [name] = args else {
        bail!("usage: lookup <name>");
    };
    let (_, services) = load()?;

    let found = services.query.lookup_by_name(name)?;
    if found.is_empty() {
        println!("⚠️  No registration found for {}", name);
        return Ok(());
    }

    println!("✓ Found {} record(s):", found.len());
    for r in &found {
        println!(
            "  {} {} {:<16} {}  {}",
            r.record.key,
            r.record.display_name,
            r.record.club_id,
            r.record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            r.rank_label()
        );
    }
    Ok(())
}

fn run_roster(args: &[String]) -> Result<()> {
    let [club] = args else {
        bail!("usage: roster <club>");
    };
    let (_, services) = load()?;

    for r in services.query.roster(club)? {
        println!("  {:<14} {:<8} {}", r.rank_label(), r.record.key, r.record.display_name);
    }
    Ok(())
}

fn run_stats() -> Result<()> {
    let (settings, services) = load()?;
    let summary = services.query.summary()?;

    let phase = match services.window.phase(chrono::Utc::now()) {
        WindowPhase::Upcoming => "not open yet",
        WindowPhase::Open => "open",
        WindowPhase::Closed => "closed",
    };

    println!("📈 Registration stats");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Window:                {} → {} ({})", settings.start_time, settings.end_time, phase);
    println!("Total registrations:   {}", summary.total_registrations);
    println!("Remaining primary:     {}", summary.remaining_primary_seats);
    for count in &summary.by_club {
        println!("  {:<20} {}", count.club_id, count.count);
    }
    Ok(())
}

fn run_verify() -> Result<()> {
    let (_, services) = load()?;
    let history = services.engine.ledger().history()?;

    println!("🔍 Verifying {} ledger entries...", history.len());
    verify_chain(&history)?;

    let replayed = club_registration::replay(&history)?.records();
    let live = services.engine.ledger().read_live()?;
    if replayed != live {
        bail!("live view does not match replayed history");
    }

    println!("✅ Ledger intact: {} live registrations", live.len());
    Ok(())
}

// ============================================================================
// Club administration
// ============================================================================

/// Apply `edit` to the club table and write the config file back.
fn save_club_edit(
    mut settings: Settings,
    edit: impl FnOnce(&ClubRegistry) -> Result<(), ConfigError>,
) -> Result<()> {
    let path = Settings::default_path();
    settings.edit_clubs(edit)?;
    settings
        .save(&path)
        .with_context(|| format!("Failed to save config {}", path.display()))?;
    println!("✓ Saved {}", path.display());
    Ok(())
}

fn run_club_set(args: &[String]) -> Result<()> {
    let [club, primary, waitlist] = args else {
        bail!("usage: club-set <club> <primary> <waitlist>");
    };
    let primary: u32 = primary
        .parse()
        .with_context(|| format!("invalid primary capacity {:?}", primary))?;
    let waitlist: u32 = waitlist
        .parse()
        .with_context(|| format!("invalid waitlist capacity {:?}", waitlist))?;
    let (settings, services) = load()?;

    let occupancy = services.engine.ledger().occupancy(club)?;
    if occupancy.primary > primary as usize || occupancy.waitlisted > waitlist as usize {
        println!(
            "⚠️  {} already holds {}; nobody is removed, new submits wait for free slots",
            club, occupancy
        );
    }

    let exists = services.clubs.get_club(club).is_some();
    save_club_edit(settings, |clubs| {
        if exists {
            clubs.set_capacity(club, primary, waitlist)
        } else {
            clubs.upsert(Club::new(club, primary, waitlist))
        }
    })?;

    let verb = if exists { "Updated" } else { "Added" };
    println!("✓ {} {}: {} primary + {} waitlist", verb, club, primary, waitlist);
    Ok(())
}

fn run_club_rename(args: &[String]) -> Result<()> {
    let [club, new_name] = args else {
        bail!("usage: club-rename <club> <new-name>");
    };
    let (settings, services) = load()?;

    if services.club_in_use(club)? {
        bail!("{} has live registrations; move or delete them first", club);
    }
    save_club_edit(settings, |clubs| clubs.rename(club, new_name))?;

    println!("✓ Renamed {} → {}", club, new_name);
    Ok(())
}

fn run_club_remove(args: &[String]) -> Result<()> {
    let [club] = args else {
        bail!("usage: club-remove <club>");
    };
    let (settings, services) = load()?;

    if services.club_in_use(club)? {
        bail!("{} has live registrations; move or delete them first", club);
    }
    save_club_edit(settings, |clubs| clubs.remove(club).map(|_| ()))?;

    println!("✓ Removed {}", club);
    Ok(())
}
