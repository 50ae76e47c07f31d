// End-to-end swap over two simulated ledgers: both escrows deploy, the
// resolver reveals the secret on the destination and withdraws the source.

use ethers::types::U256;
use swap_protocol::{
    cross_chain::{SwapOutcome, SwapState},
    data_structures::Side,
    escrow::EscrowStatus,
    onchain::{ChainAdapter, NATIVE_ASSET},
    test_utils::{
        maker_address, resolver_address, standard_secret, SwapEnv, DST_TOKEN, MAKING_AMOUNT,
        SRC_TOKEN, TAKING_AMOUNT,
    },
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test]
async fn happy_path_swaps_both_legs() {
    init_logger();
    let env = SwapEnv::new().await;
    let signed = env.signed_order().await;
    let order_hash = signed.order_hash();

    let maker_src = env.balance(Side::Src, maker_address(), SRC_TOKEN).await;
    let maker_dst = env.balance(Side::Dst, maker_address(), DST_TOKEN).await;
    let resolver_src = env.balance(Side::Src, resolver_address(), SRC_TOKEN).await;
    let resolver_dst = env.balance(Side::Dst, resolver_address(), DST_TOKEN).await;
    let resolver_gas = env.balance(Side::Src, resolver_address(), NATIVE_ASSET).await;

    let outcome = env
        .coordinator
        .execute(signed.clone(), standard_secret().into(), U256::from(MAKING_AMOUNT))
        .await
        .expect("swap runs");

    let SwapOutcome::Completed { src, dst, .. } = &outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(outcome.order_hash(), order_hash);
    assert!(src.receipt.is_some());
    assert!(dst.as_ref().and_then(|d| d.receipt.as_ref()).is_some());

    // Maker sold the source asset and received the destination asset.
    assert_eq!(
        maker_src - env.balance(Side::Src, maker_address(), SRC_TOKEN).await,
        U256::from(MAKING_AMOUNT)
    );
    assert_eq!(
        env.balance(Side::Dst, maker_address(), DST_TOKEN).await - maker_dst,
        U256::from(TAKING_AMOUNT)
    );
    assert_eq!(
        env.balance(Side::Src, resolver_address(), SRC_TOKEN).await - resolver_src,
        U256::from(MAKING_AMOUNT)
    );
    assert_eq!(
        resolver_dst - env.balance(Side::Dst, resolver_address(), DST_TOKEN).await,
        U256::from(TAKING_AMOUNT)
    );
    // The resolver withdrew both escrows itself, so its deposits came back.
    assert_eq!(
        env.balance(Side::Src, resolver_address(), NATIVE_ASSET).await,
        resolver_gas
    );

    let ctx = env.coordinator.snapshot(order_hash).await.unwrap();
    assert_eq!(ctx.state, SwapState::Completed);
    assert!(ctx.secret_revealed);
    let src_escrow = ctx.src.expect("source escrow recorded");
    let dst_escrow = ctx.dst.expect("destination escrow recorded");
    assert_eq!(src_escrow.status, EscrowStatus::Withdrawn);
    assert_eq!(dst_escrow.status, EscrowStatus::Withdrawn);
    assert_eq!(
        env.src.escrow_status(src_escrow.address).await.unwrap(),
        EscrowStatus::Withdrawn
    );
    assert_eq!(
        env.dst.revealed_secret(dst_escrow.address).await.unwrap(),
        Some(standard_secret())
    );
    assert!(env.coordinator.active_swaps().await.is_empty());
}

#[tokio::test]
async fn step_by_step_matches_execute() {
    init_logger();
    let env = SwapEnv::new().await;
    let signed = env.signed_order().await;
    let coordinator = &env.coordinator;

    let ctx = coordinator
        .register(signed.clone(), signed.order.making_amount)
        .await
        .unwrap();
    let (ctx, src) = coordinator.deploy_source(&ctx).await.unwrap();
    assert_eq!(ctx.state, SwapState::SrcDeployed);
    assert_eq!(src.escrow.immutables.amount, signed.order.making_amount);
    assert_eq!(src.complement.amount, signed.order.taking_amount);

    let (ctx, dst) = coordinator.deploy_destination(&ctx).await.unwrap();
    assert_eq!(ctx.state, SwapState::DstDeployed);
    assert_eq!(dst.escrow.immutables.hash_lock, src.escrow.immutables.hash_lock);
    assert_eq!(dst.escrow.immutables.token, DST_TOKEN);
    assert_eq!(
        env.dst.escrow_status(dst.escrow.address).await.unwrap(),
        EscrowStatus::Deployed
    );

    let secret = standard_secret().into();
    coordinator
        .await_window(&ctx, Side::Dst, swap_protocol::data_structures::Window::Withdrawal)
        .await
        .unwrap();
    let (ctx, _) = coordinator.withdraw(&ctx, Side::Dst, &secret).await.unwrap();
    assert_eq!(ctx.state, SwapState::Withdrawing);

    coordinator
        .await_window(&ctx, Side::Src, swap_protocol::data_structures::Window::Withdrawal)
        .await
        .unwrap();
    let (ctx, receipt) = coordinator.withdraw(&ctx, Side::Src, &secret).await.unwrap();
    assert_eq!(ctx.state, SwapState::Completed);
    assert_eq!(receipt.side, Side::Src);
}
