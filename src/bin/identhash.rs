//! `identhash` — computes an asset's `unique_id` from its nine identity
//! fields, given on the command line. A small single-purpose CLI utility,
//! alongside the gateway binary itself.

use inspect_gateway::identity::{unique_id, IdentityFields};

fn usage() -> ! {
    eprintln!(
        "Usage: identhash --paint-seed N --paint-index N --paint-wear N --def-index N \\
    --origin N --rarity N --quest-id N --quality N --drop-reason N

Any omitted field defaults to 0."
    );
    std::process::exit(1);
}

fn parse_field(args: &[String], i: &mut usize) -> Option<i64> {
    *i += 1;
    match args.get(*i) {
        Some(value) => value.parse().ok(),
        None => usage(),
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let mut fields = IdentityFields::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => usage(),
            "--paint-seed" => fields.paint_seed = parse_field(&args, &mut i),
            "--paint-index" => fields.paint_index = parse_field(&args, &mut i),
            "--paint-wear" => fields.paint_wear = parse_field(&args, &mut i),
            "--def-index" => fields.def_index = parse_field(&args, &mut i),
            "--origin" => fields.origin = parse_field(&args, &mut i),
            "--rarity" => fields.rarity = parse_field(&args, &mut i),
            "--quest-id" => fields.quest_id = parse_field(&args, &mut i),
            "--quality" => fields.quality = parse_field(&args, &mut i),
            "--drop-reason" => fields.drop_reason = parse_field(&args, &mut i),
            other => {
                eprintln!("Error: unrecognized argument {other:?}");
                usage();
            }
        }
        i += 1;
    }

    println!("{}", unique_id(&fields));
}
