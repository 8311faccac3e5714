use anyhow::Result;
use clap::{arg, crate_name, crate_version, ArgAction, ArgMatches, Command};
use psweep::{
    logger,
    range::Ipv4Range,
    sweep::{IcmpProbe, RawEndpoint, Sweeper, PROCESS_IDENT},
};

struct ParsedArgs {
    debug: bool,
    concurrency: usize,
    range: Ipv4Range,
}

fn parse_args(matches: ArgMatches) -> Result<ParsedArgs> {
    let debug = matches.get_flag("debug");

    let concurrency = *matches.get_one::<usize>("concurrency").unwrap();

    let range = matches
        .get_one::<String>("range")
        .unwrap()
        .parse::<Ipv4Range>()?;

    Ok(ParsedArgs {
        debug,
        concurrency,
        range,
    })
}

fn main() -> Result<()> {
    let arg_matches = Command::new(crate_name!())
        .about(
            "Subnet sweeper which reports every host answering an ICMP echo request.\n\
            Raw ICMP sockets usually require a privileged user.",
        )
        .version(crate_version!())
        .arg_required_else_help(true)
        .args([
            arg!(-d --debug "Turns on debugging information").action(ArgAction::SetTrue),
            arg!(-c --concurrency <N> "Maximum number of in-flight probes")
                .value_parser(clap::value_parser!(usize))
                .default_value("256"),
            arg!([range] "Subnet to sweep, in CIDR notation (e.g. 192.168.1.0/24)")
                .required(true),
        ])
        .get_matches();

    // Extract arguments.
    let parsed = parse_args(arg_matches)?;

    logger::init(parsed.debug);

    // Start sweeper.
    let probe = IcmpProbe::<RawEndpoint>::new(*PROCESS_IDENT);
    let sweeper = Sweeper::new(probe, parsed.concurrency);

    // Show results as replies arrive.
    println!("Active hosts:");
    sweeper.run(parsed.range, |host| {
        println!("{} is active (response time: {:?})", host.addr, host.rtt);
    });

    Ok(())
}
