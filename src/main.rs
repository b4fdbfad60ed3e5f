fn main() {
    medbridge_lib::run()
}
