fn main() -> anyhow::Result<()> {
    stand_pos_lib::run()
}
