//! Scripted walkthrough of the keymesh protocol with in-memory devices
//! and an in-process service.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use keymesh_device::Device;
use keymesh_service::Service;

#[derive(Parser)]
#[command(name = "keymesh", about = "Multi-device authenticator proof-of-concept")]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pair N devices, register them with a service, log in, rotate the
    /// seed, and drive the OVK migration to quorum.
    Walkthrough {
        /// Number of devices in the mesh.
        #[clap(long, short, default_value_t = 3)]
        devices: usize,

        /// Password shared out-of-band for the pairing ceremony.
        #[clap(long, default_value = "correct horse battery staple")]
        password: String,
    },
}

const USERNAME: &str = "alice";
const SERVICE_ID: &str = "demo-service";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Walkthrough { devices, password } => walkthrough(devices, &password),
    }
}

fn walkthrough(count: usize, password: &str) -> Result<()> {
    if count < 2 {
        bail!("a mesh needs at least 2 devices");
    }

    let mut devices = Vec::with_capacity(count);
    for _ in 0..count {
        devices.push(Device::new().context("device setup failed")?);
    }

    println!("== pairing: {count} devices negotiate a shared seed ==");
    ring_negotiate(&mut devices, password, false)?;
    let seed = devices[0]
        .seed()
        .latest_secret()
        .context("no seed after pairing")?;
    println!("   shared seed fingerprint: {}", &hex::encode(seed)[..16]);

    let mut service = Service::new();

    println!("== registration ==");
    for (i, device) in devices.iter_mut().enumerate() {
        let resp = service
            .start_authn(USERNAME)
            .context("challenge issuance failed")?;
        let existing = resp.ovkm.map(|view| view.ovkm);
        let material = device.register(SERVICE_ID, &resp.challenge, existing.as_ref())?;
        let accepted = service.handle_register(&keymesh_common::params::RegistrationRequest {
            username: USERNAME.into(),
            cred: material.cred,
            ovkm: material.auth,
        });
        if !accepted {
            bail!("registration of device {i} was rejected");
        }
        let kind = if i == 0 { "initial" } else { "seamless" };
        println!("   device {i}: {kind} registration accepted");
    }

    println!("== login from every device ==");
    for (i, device) in devices.iter_mut().enumerate() {
        if !login(&mut service, device)? {
            bail!("login from device {i} failed");
        }
        println!("   device {i}: login ok");
    }

    println!("== seed rotation ==");
    ring_negotiate(&mut devices, password, true)?;
    let rotated = devices[0]
        .seed()
        .latest_secret()
        .context("no seed after rotation")?;
    println!("   new seed fingerprint: {}", &hex::encode(rotated)[..16]);

    let old_ovk = service
        .user(USERNAME)
        .context("user vanished")?
        .ovkm()
        .ovk
        .clone();
    for (i, device) in devices.iter_mut().enumerate() {
        if !login(&mut service, device)? {
            bail!("login from device {i} failed during migration");
        }
        let current = &service.user(USERNAME).context("user vanished")?.ovkm().ovk;
        if *current != old_ovk {
            println!("   device {i}: update message reached quorum, OVK migrated");
            break;
        }
        println!("   device {i}: update message recorded, awaiting quorum");
    }

    for device in devices.iter_mut() {
        device.acknowledge_rotation();
    }

    println!("== devices pruned by the migration re-register seamlessly ==");
    for (i, device) in devices.iter_mut().enumerate() {
        let resp = service.start_authn(USERNAME).context("challenge failed")?;
        let creds = resp.creds.unwrap_or_default();
        if device.store().find(&creds).is_some() {
            continue;
        }
        let existing = resp.ovkm.map(|view| view.ovkm);
        let material = device.register(SERVICE_ID, &resp.challenge, existing.as_ref())?;
        let accepted = service.handle_register(&keymesh_common::params::RegistrationRequest {
            username: USERNAME.into(),
            cred: material.cred,
            ovkm: material.auth,
        });
        if !accepted {
            bail!("re-registration of device {i} was rejected");
        }
        println!("   device {i}: re-registered under the new OVK");
    }

    println!("== final logins ==");
    for (i, device) in devices.iter_mut().enumerate() {
        if !login(&mut service, device)? {
            bail!("final login from device {i} failed");
        }
        println!("   device {i}: login ok");
    }

    println!("walkthrough complete");
    Ok(())
}

fn login(service: &mut Service, device: &mut Device) -> Result<bool> {
    let resp = service.start_authn(USERNAME).context("challenge failed")?;
    let creds = resp.creds.context("no credentials registered")?;
    let view = resp.ovkm.context("no OVK material")?;
    let material = device.authn(SERVICE_ID, &resp.challenge, &creds, &view)?;
    Ok(service.handle_authn(&keymesh_common::params::AuthnRequest {
        username: USERNAME.into(),
        cred_jwk: material.cred_jwk,
        sig: material.sig,
        updating: material.updating,
    }))
}

/// Run the pairing ceremony over the password envelope: device `i`
/// consumes material from device `i - 1` in a ring.
fn ring_negotiate(devices: &mut [Device], password: &str, updating: bool) -> Result<()> {
    let n = devices.len();
    let names: Vec<String> = (0..n).map(|i| format!("device-{i}")).collect();

    let mut latest = Vec::with_capacity(n);
    for i in 0..n {
        latest.push(devices[i].init_seed_negotiation(
            password,
            &names[i],
            &names[(i + n - 1) % n],
            n as u32,
            updating,
        )?);
    }

    let mut done = vec![false; n];
    for _round in 0..n {
        for i in 0..n {
            if done[i] {
                continue;
            }
            let incoming = latest[(i + n - 1) % n].clone();
            let progress = devices[i].continue_seed_negotiation(&incoming, updating)?;
            latest[i] = progress.ciphertext;
            done[i] = progress.completed;
        }
    }
    if !done.iter().all(|d| *d) {
        bail!("seed ceremony did not converge");
    }
    Ok(())
}
