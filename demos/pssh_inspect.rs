use psshscan::PsshBox;

fn main() -> anyhow::Result<()> {
    let input = std::env::args()
        .nth(1)
        .expect("Usage: pssh_inspect <pssh_base64>");

    let pssh = PsshBox::from_base64(&input)?;
    println!("version: {}", pssh.version);
    println!("flags: {}", pssh.flags);
    println!("system_id: {}", pssh.system_id);
    if let Some(system) = pssh.known_system() {
        println!("system: {}", system.name());
    }

    if pssh.key_ids.is_empty() {
        println!("key_ids: <none>");
    } else {
        for kid in pssh.key_ids.iter() {
            println!("kid: {}", kid);
        }
    }
    println!("data: {} bytes", pssh.data.len());

    Ok(())
}
