// Escrow contract bindings. The deployed contract is the source of truth
// for bounty settlement state; this ABI is consumed, never implemented here.
use ethers::prelude::abigen;

abigen!(
    BountyEscrow,
    r#"[
        function getBounty(bytes32 bountyId) external view returns (bytes32, address, address, uint256, uint256, uint256, uint8)
        function resolveBounty(bytes32 bountyId, address to) external
        function refundExpired(bytes32 bountyId) external
        function availableFees(address token) external view returns (uint256)
        function totalFeesAccrued() external view returns (uint256)
        function feeBps() external view returns (uint16)
        function withdrawFees(address token, address to, uint256 amount) external
        function owner() external view returns (address)
        event BountyResolved(bytes32 indexed bountyId, address indexed to, uint256 amount)
        event BountyRefunded(bytes32 indexed bountyId, address indexed sponsor, uint256 amount)
        event FeesWithdrawn(address indexed token, address indexed to, uint256 amount)
    ]"#
);
